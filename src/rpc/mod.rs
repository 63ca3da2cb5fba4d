pub mod correlator;
pub mod message;

pub use correlator::Correlator;
pub use message::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
