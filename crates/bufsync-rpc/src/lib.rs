mod client;
mod events;
mod manager;
mod protocol;

pub use client::{split_atomic_response, EngineClient};
pub use events::decode_event;
pub use manager::EngineProcess;
pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
