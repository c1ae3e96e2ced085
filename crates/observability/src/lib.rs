//! Process-wide logging setup shared by the sync worker and the replay tool.

/// Subscriber installation (format, filter).
pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
