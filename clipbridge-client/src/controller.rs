//! Copy, cut and paste handling for one editing session.
//!
//! The controller is driven from a single event loop through `&mut self`.
//! Clipboard population always happens inside the event handler that asked
//! for it; anything that needs the network runs as a task on the tokio
//! runtime the controller was created on, and the editing command for that
//! operation is only sent once its transfer succeeded.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use clipbridge_core::{
    ClipboardKind, ClipboardOperation, ConsentGate, ConsentStore, EditingCommand, MAX_MIME_LEN,
    MIME_TEXT_HTML, MIME_TEXT_PLAIN, OriginTag, PayloadPart, SelectionKind, Serial,
    SessionClipboardCache, WARNED_ABOUT_LARGE_COPY, encode_paste_frame, find_origin,
    html::strip_html, now_unix_ms, payload::encode_payload, stub_html,
};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    error::ClipboardError,
    host::{
        ClipboardFile, ClipboardHost, DataTransfer, DocumentEngine, EditingChannel, ExecTarget,
        UserNotifier,
    },
    transfer::{SharedProgress, TransferEngine, UploadField, no_progress},
};

pub const STUB_MESSAGE: &str =
    "When pasting outside the suite it is necessary to first click the 'download' button";
pub const COMPLEX_SELECTION_NOTICE: &str = "Please use the following link to download the \
     selection from your document and paste into other applications on your device: ";
pub const TRANSIENT_PLACEHOLDER: &str = "dummy content";
pub const LEGACY_CANARY: &str = "---copy-paste-canary---";
pub const LEGACY_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const LEGACY_POLL_ATTEMPTS: u32 = 50;

const FILES_TYPE: &str = "Files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Intercepted,
    FastPath,
    SlowPath,
    Settled,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteRoute {
    /// Content came from this session; the backend already holds it.
    SameOrigin,
    /// Content lives on another server and is relayed to ours.
    Relay { source: String, destination: String },
    /// Raw clipboard content packed into a payload blob and uploaded.
    Upload { destination: String, size: usize },
    /// Images forwarded one message each.
    Images { count: usize },
    Nothing,
}

enum TicketState {
    Ready(Result<(), ClipboardError>),
    Pending(JoinHandle<Result<(), ClipboardError>>),
}

/// Outcome of one intercepted paste. Slow-path pastes finish in the
/// background; awaiting [`PasteTicket::settle`] is optional.
pub struct PasteTicket {
    route: PasteRoute,
    state: TicketState,
}

impl PasteTicket {
    fn ready(route: PasteRoute, result: Result<(), ClipboardError>) -> Self {
        Self {
            route,
            state: TicketState::Ready(result),
        }
    }

    fn pending(route: PasteRoute, job: JoinHandle<Result<(), ClipboardError>>) -> Self {
        Self {
            route,
            state: TicketState::Pending(job),
        }
    }

    pub fn route(&self) -> &PasteRoute {
        &self.route
    }

    pub fn is_pending(&self) -> bool {
        matches!(&self.state, TicketState::Pending(job) if !job.is_finished())
    }

    pub async fn settle(self) -> Result<(), ClipboardError> {
        match self.state {
            TicketState::Ready(result) => result,
            TicketState::Pending(job) => match job.await {
                Ok(result) => result,
                Err(err) => Err(ClipboardError::Runtime(format!("paste task failed: {err}"))),
            },
        }
    }
}

impl std::fmt::Debug for PasteTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasteTicket")
            .field("route", &self.route)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The native command on the document fired our handler.
    Direct,
    /// It took a transient editable element to get the event.
    Transient,
    Unsupported,
}

#[derive(Debug)]
pub struct Settled {
    pub kind: ClipboardKind,
    pub settlement: Settlement,
    /// Set when the intercepted event was a paste.
    pub paste: Option<PasteTicket>,
}

impl Settled {
    pub fn into_result(self) -> Result<Option<PasteTicket>, ClipboardError> {
        match self.settlement {
            Settlement::Unsupported => Err(ClipboardError::Unsupported(self.kind)),
            Settlement::Direct | Settlement::Transient => Ok(self.paste),
        }
    }
}

struct LargeCopy {
    url: String,
    job: JoinHandle<Result<Bytes, ClipboardError>>,
}

/// Session-scoped clipboard state, created with the controller and dropped
/// with it.
struct SessionContext {
    config: SessionConfig,
    cache: SessionClipboardCache,
    consent: ConsentGate<Box<dyn ConsentStore>>,
    serial: Serial,
    last_operation: Option<ClipboardOperation>,
    phase: Phase,
    large_copy: Option<LargeCopy>,
    unsupported_warned: bool,
}

pub struct ClipboardController {
    session: SessionContext,
    runtime: Handle,
    engine: TransferEngine,
    channel: Arc<dyn EditingChannel>,
    document: Box<dyn DocumentEngine>,
    notifier: Box<dyn UserNotifier>,
    progress: SharedProgress,
}

impl ClipboardController {
    /// Must be called from within a tokio runtime; background transfers are
    /// spawned onto it.
    pub fn new(
        config: SessionConfig,
        engine: TransferEngine,
        channel: Arc<dyn EditingChannel>,
        document: Box<dyn DocumentEngine>,
        notifier: Box<dyn UserNotifier>,
        consent: Box<dyn ConsentStore>,
    ) -> Result<Self, ClipboardError> {
        let runtime = Handle::try_current()
            .map_err(|err| ClipboardError::Runtime(format!("no tokio runtime: {err}")))?;
        let consent = ConsentGate::new(consent, config.user_name.clone());

        Ok(Self {
            session: SessionContext {
                config,
                cache: SessionClipboardCache::new(),
                consent,
                serial: 0,
                last_operation: None,
                phase: Phase::Idle,
                large_copy: None,
                unsupported_warned: false,
            },
            runtime,
            engine,
            channel,
            document,
            notifier,
            progress: no_progress(),
        })
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.session.config
    }

    pub fn cache(&self) -> &SessionClipboardCache {
        &self.session.cache
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn serial(&self) -> Serial {
        self.session.serial
    }

    pub fn last_operation(&self) -> Option<ClipboardOperation> {
        self.session.last_operation
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    /// Origin of content copied from this session right now.
    pub fn own_origin(&self) -> OriginTag {
        self.session
            .config
            .origin(self.session.cache.current_key())
    }

    pub fn on_text_selection(&mut self, html: impl Into<String>) {
        self.session.cache.set_selection(html);
    }

    pub fn on_complex_selection(&mut self) {
        self.session.cache.set_selection(COMPLEX_SELECTION_NOTICE);
    }

    pub fn clear_selection(&mut self) {
        self.session.cache.clear_selection();
    }

    pub fn set_access_key(&mut self, key: impl Into<String>) {
        self.session.cache.set_key(key);
    }

    pub fn on_copy(&mut self, carrier: &mut dyn DataTransfer) {
        self.copy_or_cut(ClipboardKind::Copy, carrier);
    }

    pub fn on_cut(&mut self, carrier: &mut dyn DataTransfer) {
        self.copy_or_cut(ClipboardKind::Cut, carrier);
    }

    pub fn on_paste(&mut self, carrier: &dyn DataTransfer) -> PasteTicket {
        self.enter(Phase::Intercepted);
        let html = carrier.get_data(MIME_TEXT_HTML);
        let ticket = self.route_paste(&html, Some(carrier), true);
        self.complete(ClipboardKind::Paste);
        self.enter(Phase::Settled);
        ticket
    }

    /// Re-routes a menu or keyboard command through the native clipboard so
    /// the browser grants access to the clipboard data. `None` for commands
    /// that are not clipboard commands.
    pub fn filter_command(
        &mut self,
        command: &str,
        host: &mut dyn ClipboardHost,
    ) -> Option<Settled> {
        let command = EditingCommand::from_uno(command)?;
        let settled = self.exec_copy_cut_paste(command.kind(), host);
        info!(command = command.as_message(), "filtered clipboard command");
        Some(settled)
    }

    /// Gets the browser to fire a real clipboard event for `kind`: first on
    /// the document, then on a transient editable element. A tier succeeded
    /// when the serial moved.
    pub fn exec_copy_cut_paste(
        &mut self,
        kind: ClipboardKind,
        host: &mut dyn ClipboardHost,
    ) -> Settled {
        let serial = self.session.serial;
        let mut paste = None;

        let executed = host.exec_command(
            kind,
            ExecTarget::Document,
            &mut |carrier: &mut dyn DataTransfer| {
                if let Some(ticket) = self.dispatch_event(kind, carrier) {
                    paste = Some(ticket);
                }
            },
        );
        debug!(%kind, executed, "document exec_command returned");
        if self.session.serial != serial {
            info!(%kind, "clipboard command ran on the document");
            return Settled {
                kind,
                settlement: Settlement::Direct,
                paste,
            };
        }

        let (success, transient_paste) = self.exec_on_transient(kind, host);
        let paste = transient_paste.or(paste);
        if success {
            info!(%kind, "clipboard command ran on transient element");
            return Settled {
                kind,
                settlement: Settlement::Transient,
                paste,
            };
        }

        warn!(%kind, "browser refused the clipboard command");
        self.enter(Phase::Unsupported);
        if !self.session.unsupported_warned {
            self.session.unsupported_warned = true;
            self.notifier
                .clipboard_unsupported(self.session.config.mobile);
        }
        Settled {
            kind,
            settlement: Settlement::Unsupported,
            paste,
        }
    }

    /// Paste for browsers without clipboard events: let the browser paste
    /// into a transient element and poll until its content changes.
    pub async fn legacy_paste(
        &mut self,
        host: &mut dyn ClipboardHost,
    ) -> Result<PasteTicket, ClipboardError> {
        let element = host.create_transient(LEGACY_CANARY);
        let prior_focus = host.focused();
        host.select_transient(element);
        host.exec_command(
            ClipboardKind::Paste,
            ExecTarget::Transient(element),
            &mut |_carrier: &mut dyn DataTransfer| {},
        );

        let mut pasted = None;
        for attempt in 0..LEGACY_POLL_ATTEMPTS {
            if let Some(html) = host.transient_html(element)
                && html != LEGACY_CANARY
            {
                debug!(attempt, "legacy paste content arrived");
                pasted = Some(html);
                break;
            }
            tokio::time::sleep(LEGACY_POLL_INTERVAL).await;
        }

        host.remove_transient(element);
        host.restore_focus(prior_focus);

        let Some(html) = pasted else {
            warn!("legacy paste produced no content");
            return Err(ClipboardError::Unsupported(ClipboardKind::Paste));
        };

        self.enter(Phase::Intercepted);
        let ticket = self.route_paste(&html, None, false);
        self.complete(ClipboardKind::Paste);
        self.enter(Phase::Settled);
        Ok(ticket)
    }

    pub fn large_copy_active(&self) -> bool {
        self.session
            .large_copy
            .as_ref()
            .is_some_and(|large| !large.job.is_finished())
    }

    pub fn large_copy_url(&self) -> Option<&str> {
        self.session
            .large_copy
            .as_ref()
            .map(|large| large.url.as_str())
    }

    /// Waits for the background large-copy download, if any, and hands over
    /// its content.
    pub async fn take_large_copy(&mut self) -> Option<Result<Bytes, ClipboardError>> {
        let LargeCopy { url, job } = self.session.large_copy.take()?;
        let result = match job.await {
            Ok(result) => result,
            Err(err) => Err(ClipboardError::Runtime(format!(
                "large copy task failed: {err}"
            ))),
        };
        match &result {
            Ok(data) => info!(%url, size = data.len(), "large copy ready"),
            Err(err) => warn!(%url, "large copy failed: {err}"),
        }
        Some(result)
    }

    fn dispatch_event(
        &mut self,
        kind: ClipboardKind,
        carrier: &mut dyn DataTransfer,
    ) -> Option<PasteTicket> {
        match kind {
            ClipboardKind::Copy => {
                self.on_copy(carrier);
                None
            }
            ClipboardKind::Cut => {
                self.on_cut(carrier);
                None
            }
            ClipboardKind::Paste => Some(self.on_paste(&*carrier)),
        }
    }

    fn exec_on_transient(
        &mut self,
        kind: ClipboardKind,
        host: &mut dyn ClipboardHost,
    ) -> (bool, Option<PasteTicket>) {
        let serial = self.session.serial;
        let element = host.create_transient(TRANSIENT_PLACEHOLDER);
        let mut paste = None;
        let mut success = false;
        let mut prior_focus = None;

        if host.has_selection_api() {
            prior_focus = host.focused();
            host.select_transient(element);
            let executed = host.exec_command(
                kind,
                ExecTarget::Transient(element),
                &mut |carrier: &mut dyn DataTransfer| {
                    debug!(%kind, "got event on transient editable");
                    if let Some(ticket) = self.dispatch_event(kind, carrier) {
                        paste = Some(ticket);
                    }
                },
            );
            debug!(%kind, executed, "transient exec_command returned");
            success = self.session.serial != serial;
        }

        host.remove_transient(element);
        if prior_focus.is_some() && host.focused() != prior_focus {
            host.restore_focus(prior_focus);
        }

        debug!(%kind, success, "transient element fallback");
        (success, paste)
    }

    fn copy_or_cut(&mut self, kind: ClipboardKind, carrier: &mut dyn DataTransfer) {
        self.enter(Phase::Intercepted);
        if self.populate_clipboard(carrier) {
            self.complete(kind);
        }
        self.send_command(EditingCommand::from(kind));
        self.enter(Phase::Settled);
    }

    fn populate_clipboard(&mut self, carrier: &mut dyn DataTransfer) -> bool {
        let content = self
            .session
            .cache
            .selection_content(self.document.selection_kind());
        let html = match content.kind {
            SelectionKind::None => {
                info!("copy/cut with no selection");
                self.enter(Phase::FastPath);
                self.stub_html()
            }
            SelectionKind::Complex => {
                info!("copy/cut with complex selection");
                self.enter(Phase::SlowPath);
                self.start_large_copy();
                self.stub_html()
            }
            SelectionKind::Simple => {
                info!("copy/cut with simple text selection");
                self.enter(Phase::FastPath);
                content.text.unwrap_or_default()
            }
        };

        let plain = strip_html(&html);
        let plain_accepted = carrier.set_data(MIME_TEXT_PLAIN, &plain);
        let html_accepted = carrier.set_data(MIME_TEXT_HTML, &html);
        if !plain_accepted && !html_accepted {
            warn!("clipboard data carrier refused the selection");
            return false;
        }
        debug!(size = html.len(), "put selection on the clipboard");
        true
    }

    fn stub_html(&self) -> String {
        stub_html(&self.own_origin(), STUB_MESSAGE, &self.session.config.lang)
    }

    // One large-copy download at a time; a second complex copy while one is
    // running is dropped.
    fn start_large_copy(&mut self) {
        if let Some(large) = &self.session.large_copy
            && !large.job.is_finished()
        {
            info!(url = %large.url, "large copy download already running, not starting another");
            return;
        }

        if self.session.consent.warn_once(WARNED_ABOUT_LARGE_COPY) {
            self.notifier.large_copy_notice();
        }

        let url = self.own_origin().url_for_mime(MIME_TEXT_HTML);
        let engine = self.engine.clone();
        let progress = Arc::clone(&self.progress);
        let task_url = url.clone();
        let job = self
            .runtime
            .spawn(async move { engine.download(&task_url, progress).await });

        info!(%url, "started large copy download");
        self.session.large_copy = Some(LargeCopy { url, job });
    }

    fn route_paste(
        &mut self,
        html: &str,
        carrier: Option<&dyn DataTransfer>,
        prefer_internal: bool,
    ) -> PasteTicket {
        let own = self.own_origin();
        let destination = own.url();

        if let Some(origin) = find_origin(html) {
            if prefer_internal
                && origin.same_session(&own)
                && self.session.cache.recognizes_key(&origin.access_key)
            {
                info!("short-circuit, internal paste");
                self.enter(Phase::FastPath);
                self.send_command(EditingCommand::Paste);
                return PasteTicket::ready(PasteRoute::SameOrigin, Ok(()));
            }

            let source = origin.url();
            info!(%source, %destination, "transfer between servers");
            self.enter(Phase::SlowPath);
            let job = self.spawn_relay(source.clone(), destination.clone());
            return PasteTicket::pending(
                PasteRoute::Relay {
                    source,
                    destination,
                },
                job,
            );
        }

        let parts = match carrier {
            Some(carrier) => textual_parts(carrier),
            None if !html.is_empty() => vec![PayloadPart::new(MIME_TEXT_HTML, html.to_owned())],
            None => Vec::new(),
        };

        if !parts.is_empty() {
            let body = match encode_payload(&parts) {
                Ok(body) => body,
                Err(err) => {
                    warn!("cannot pack pasted content: {err}");
                    return PasteTicket::ready(PasteRoute::Nothing, Err(err.into()));
                }
            };
            info!(size = body.len(), "normal content, smart paste not possible");
            self.enter(Phase::SlowPath);
            let size = body.len();
            let job = self.spawn_upload(destination.clone(), body);
            return PasteTicket::pending(PasteRoute::Upload { destination, size }, job);
        }

        let images = carrier
            .map(|carrier| {
                carrier
                    .files()
                    .into_iter()
                    .filter(ClipboardFile::is_image)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !images.is_empty() {
            info!(count = images.len(), "pasting images");
            self.enter(Phase::FastPath);
            for image in &images {
                match encode_paste_frame(&image.mime, &image.data) {
                    Ok(frame) => self.channel.send_binary(frame),
                    Err(err) => warn!(mime = %image.mime, "skipping image: {err}"),
                }
            }
            return PasteTicket::ready(
                PasteRoute::Images {
                    count: images.len(),
                },
                Ok(()),
            );
        }

        info!("nothing we can paste");
        PasteTicket::ready(PasteRoute::Nothing, Ok(()))
    }

    fn spawn_relay(
        &self,
        source: String,
        destination: String,
    ) -> JoinHandle<Result<(), ClipboardError>> {
        let engine = self.engine.clone();
        let channel = Arc::clone(&self.channel);
        let progress = Arc::clone(&self.progress);
        self.runtime.spawn(async move {
            engine.relay(&source, &destination, progress).await?;
            info!("relay done, now paste");
            channel.send_text(EditingCommand::Paste.as_message());
            Ok(())
        })
    }

    fn spawn_upload(
        &self,
        destination: String,
        body: Bytes,
    ) -> JoinHandle<Result<(), ClipboardError>> {
        let engine = self.engine.clone();
        let channel = Arc::clone(&self.channel);
        let progress = Arc::clone(&self.progress);
        self.runtime.spawn(async move {
            let size = body.len();
            engine
                .upload(&destination, UploadField::File, body, progress)
                .await?;
            info!(size, "posted clipboard content, now paste");
            channel.send_text(EditingCommand::Paste.as_message());
            Ok(())
        })
    }

    fn send_command(&self, command: EditingCommand) {
        debug!(command = command.as_message(), "sending editing command");
        self.channel.send_text(command.as_message());
    }

    fn complete(&mut self, kind: ClipboardKind) {
        self.session.serial += 1;
        let operation = ClipboardOperation {
            kind,
            serial: self.session.serial,
            timestamp_unix_ms: now_unix_ms(),
        };
        debug!(%kind, serial = operation.serial, "clipboard operation complete");
        self.session.last_operation = Some(operation);
    }

    fn enter(&mut self, phase: Phase) {
        if self.session.phase != phase {
            debug!(from = ?self.session.phase, to = ?phase, "clipboard phase");
            self.session.phase = phase;
        }
    }
}

/// Every non-empty textual entry of the carrier, in the order it lists them.
fn textual_parts(carrier: &dyn DataTransfer) -> Vec<PayloadPart> {
    carrier
        .types()
        .into_iter()
        .filter(|mime| mime != FILES_TYPE)
        .filter(|mime| {
            let usable = !mime.is_empty() && mime.len() <= MAX_MIME_LEN && !mime.contains('\n');
            if !usable {
                warn!(mime = %mime, "ignoring clipboard type");
            }
            usable
        })
        .filter_map(|mime| {
            let data = carrier.get_data(&mime);
            (!data.is_empty()).then(|| PayloadPart::new(mime, data))
        })
        .collect()
}
