pub mod config;
pub mod consent_file;
pub mod controller;
pub mod error;
pub mod host;
pub mod transfer;

pub use config::SessionConfig;
pub use consent_file::FileConsentStore;
pub use controller::{ClipboardController, PasteRoute, PasteTicket, Phase, Settled, Settlement};
pub use error::ClipboardError;
pub use host::{
    ClipboardFile, ClipboardHost, DataTransfer, DocumentEngine, EditingChannel, ExecTarget,
    FocusToken, TransientId, UserNotifier,
};
pub use transfer::{
    NoProgress, ProgressRange, ProgressSink, SharedProgress, TRANSFER_TIMEOUT, TransferDirection,
    TransferEngine, TransferJob, TransferState, UploadField,
};
