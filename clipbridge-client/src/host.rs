//! Seams between the clipboard controller and everything it drives but does
//! not own: the browser clipboard, the editing backend connection, the
//! document engine and the user-facing dialogs.

use bytes::Bytes;
use clipbridge_core::{ClipboardKind, SelectionKind};

pub type TransientId = u64;
pub type FocusToken = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardFile {
    pub mime: String,
    pub data: Bytes,
}

impl ClipboardFile {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image")
    }
}

/// Data carrier of a single clipboard event.
pub trait DataTransfer {
    /// Types in the order the browser lists them; may include `"Files"`.
    fn types(&self) -> Vec<String>;
    /// Content for `mime`, empty when absent.
    fn get_data(&self, mime: &str) -> String;
    /// Returns whether the carrier accepted the data.
    fn set_data(&mut self, mime: &str, data: &str) -> bool;
    fn files(&self) -> Vec<ClipboardFile>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTarget {
    Document,
    Transient(TransientId),
}

/// Browser-side clipboard surface.
pub trait ClipboardHost {
    /// Runs the native `kind` command against `target`. A clipboard event the
    /// browser fires in response is delivered to `on_event` before this
    /// returns. The return value is the browser's own success report, which
    /// does not prove the event fired.
    fn exec_command(
        &mut self,
        kind: ClipboardKind,
        target: ExecTarget,
        on_event: &mut dyn FnMut(&mut dyn DataTransfer),
    ) -> bool;

    /// Whether a document selection can be moved programmatically.
    fn has_selection_api(&self) -> bool;

    /// Adds an invisible editable element holding `html`.
    fn create_transient(&mut self, html: &str) -> TransientId;
    /// Moves the document selection into the element and focuses it.
    fn select_transient(&mut self, id: TransientId);
    fn transient_html(&self, id: TransientId) -> Option<String>;
    fn remove_transient(&mut self, id: TransientId);

    fn focused(&self) -> Option<FocusToken>;
    /// `None` focuses the editor itself.
    fn restore_focus(&mut self, token: Option<FocusToken>);
}

/// Fire-and-forget message channel to the editing backend.
pub trait EditingChannel: Send + Sync {
    fn send_text(&self, message: &str);
    fn send_binary(&self, message: Bytes);
}

pub trait DocumentEngine {
    fn selection_kind(&self) -> SelectionKind;
}

pub trait UserNotifier {
    /// First-time explanation of how large copies reach the OS clipboard.
    fn large_copy_notice(&mut self);
    /// The browser refused every way of running a clipboard command.
    fn clipboard_unsupported(&mut self, mobile: bool);
}
