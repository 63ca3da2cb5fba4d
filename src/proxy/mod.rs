pub mod core;
pub mod patterns;
pub mod registry;
pub mod target;

pub use core::{ProxyCore, ProxyEvent};
pub use registry::{ExposureReason, RegistryStats, ToolRecord, ToolRegistry, VisibilityRules};
pub use target::{ConnectionState, TargetEvent, TargetServerConnection, ToolDescriptor};
