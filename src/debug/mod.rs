pub mod manager;
pub mod output;
pub mod scripts;
pub mod session;
pub mod state;

pub use manager::{CleanupOptions, CleanupReport, SessionManager};
pub use session::{DebugSession, DebugSessionConfig, SessionTarget};
pub use state::{BreakpointSpec, SessionState};
