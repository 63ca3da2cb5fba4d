//! Wire types for the upstream MCP channel. These are the same JSON-RPC 2.0
//! shapes used on the child-server and CDP channels (§6); re-exported here
//! rather than redefined so all three channels stay byte-for-byte
//! compatible with a single source of truth.

pub use crate::rpc::message::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
