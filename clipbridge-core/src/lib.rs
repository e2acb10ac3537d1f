use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod consent;
pub mod html;
pub mod origin;
pub mod payload;

pub use cache::SessionClipboardCache;
pub use consent::{ConsentFlag, ConsentGate, ConsentStore, MemoryConsentStore};
pub use origin::{OriginTag, find_origin, stub_html};
pub use payload::{PayloadBlob, PayloadPart};

pub const MAX_MIME_LEN: usize = 128;
pub const MAX_CLIPBOARD_BYTES: usize = 16 * 1024 * 1024;
pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_TEXT_HTML: &str = "text/html";
pub const WARNED_ABOUT_LARGE_COPY: &str = "warnedAboutLargeCopy";

pub type ViewId = u32;
pub type Serial = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardKind {
    Copy,
    Cut,
    Paste,
}

impl ClipboardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClipboardKind::Copy => "copy",
            ClipboardKind::Cut => "cut",
            ClipboardKind::Paste => "paste",
        }
    }
}

impl std::fmt::Display for ClipboardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed clipboard interaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardOperation {
    pub kind: ClipboardKind,
    pub serial: Serial,
    pub timestamp_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    None,
    Simple,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionContent {
    pub kind: SelectionKind,
    pub text: Option<String>,
}

impl SelectionContent {
    pub fn none() -> Self {
        Self {
            kind: SelectionKind::None,
            text: None,
        }
    }
}

/// Instruction forwarded to the editing backend so it runs its own clipboard
/// handling against the authoritative document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditingCommand {
    Copy,
    Cut,
    Paste,
}

impl EditingCommand {
    pub fn as_message(self) -> &'static str {
        match self {
            EditingCommand::Copy => "uno .uno:Copy",
            EditingCommand::Cut => "uno .uno:Cut",
            EditingCommand::Paste => "uno .uno:Paste",
        }
    }

    /// Maps a menu/keyboard command name (`.uno:Copy`, ...) to a command.
    pub fn from_uno(command: &str) -> Option<Self> {
        match command {
            ".uno:Copy" => Some(EditingCommand::Copy),
            ".uno:Cut" => Some(EditingCommand::Cut),
            ".uno:Paste" => Some(EditingCommand::Paste),
            _ => None,
        }
    }

    pub fn kind(self) -> ClipboardKind {
        match self {
            EditingCommand::Copy => ClipboardKind::Copy,
            EditingCommand::Cut => ClipboardKind::Cut,
            EditingCommand::Paste => ClipboardKind::Paste,
        }
    }
}

impl From<ClipboardKind> for EditingCommand {
    fn from(kind: ClipboardKind) -> Self {
        match kind {
            ClipboardKind::Copy => EditingCommand::Copy,
            ClipboardKind::Cut => EditingCommand::Cut,
            ClipboardKind::Paste => EditingCommand::Paste,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("malformed origin tag: {0}")]
    MalformedOrigin(String),
    #[error("malformed clipboard payload at byte {offset}: {reason}")]
    MalformedPayload { offset: usize, reason: &'static str },
    #[error("clipboard MIME must be non-empty, single-line and <= 128 bytes")]
    InvalidMime,
    #[error("consent storage error: {0}")]
    Storage(String),
}

/// Builds the binary `paste mimetype=<mime>\n<bytes>` message used to hand a
/// single image straight to the editing backend.
pub fn encode_paste_frame(mime: &str, data: &[u8]) -> Result<Bytes, CoreError> {
    let mime = mime.trim();
    if mime.is_empty() || mime.len() > MAX_MIME_LEN || mime.contains('\n') {
        return Err(CoreError::InvalidMime);
    }

    let header = format!("paste mimetype={mime}\n");
    let mut out = BytesMut::with_capacity(header.len() + data.len());
    out.put_slice(header.as_bytes());
    out.put_slice(data);
    Ok(out.freeze())
}

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
