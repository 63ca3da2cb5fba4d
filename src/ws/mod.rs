pub mod transport;

pub use transport::{WsEvent, WsTransport, WsTransportOptions};
