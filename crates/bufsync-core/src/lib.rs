pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod host;
pub mod position;
pub mod repeat;
pub mod rpc;

// Re-export key types
pub use config::SyncSettings;
pub use diff::{line_ranges, EditRange, RangeKind};
pub use engine::{apply_change_record, build_outbound_changes, OutboundBatch, OutboundChange, SyncEngine};
pub use error::{Result, SyncError};
pub use host::{
    ContentChange, DocumentId, DocumentSnapshot, EditOptions, Eol, HostChangeEvent, HostEditOp, HostEditor,
    HostError, Selection,
};
pub use position::{Position, Range};
pub use repeat::RepeatChange;
pub use rpc::{BufferId, ChangeRecord, EngineEvent, RpcCall, RpcChannel, RpcError};
