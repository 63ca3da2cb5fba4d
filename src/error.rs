use thiserror::Error;

/// Central error type. Every fallible path in this crate resolves here so the
/// Request Dispatcher can map a single type onto JSON-RPC error codes without
/// a chain of `From` impls at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    // -- Transport --
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    // -- Protocol --
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    // -- Target-not-found --
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    // -- State-violation --
    #[error("invalid session state for this operation: {0}")]
    InvalidState(String),

    #[error("reconnection already in progress for server: {0}")]
    ReconnectInProgress(String),

    // -- Capacity (usually logged at warn rather than returned, but callers
    //    that cannot produce even a best-effort result surface this) --
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    // -- Fatal --
    #[error("process error: {0}")]
    Process(String),

    #[error("source map error: {0}")]
    SourceMap(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps an error onto the JSON-RPC error code space used at the
    /// dispatcher boundary. No exception escapes to the upstream channel;
    /// every handler resolves its `Result` to either a payload or one of
    /// these codes.
    pub fn error_code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => -32600,
            Error::MethodNotFound(_) => -32601,

            Error::SessionNotFound(_) => -32001,
            Error::ServerNotFound(_) => -32002,
            Error::ToolNotFound(_) => -32005,
            Error::Protocol(_) => -32003,
            Error::Process(_) => -32004,
            Error::InvalidState(_) => -32006,
            Error::ReconnectInProgress(_) => -32007,
            Error::Transport(_) => -32008,
            Error::ConnectionTimeout(_) | Error::RequestTimeout(_) => -32009,
            Error::InvalidUrl(_) => -32010,
            Error::Capacity(_) => -32011,
            Error::SourceMap(_) => -32012,
            Error::Config(_) => -32013,

            Error::Internal(_) | Error::Io(_) | Error::Json(_) => -32603,
        }
    }
}
