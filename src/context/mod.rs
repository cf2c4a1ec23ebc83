//! Device session, context groups and capability detection.

pub use self::capabilities::{Capabilities, DriverInfo, DriverProfile};
pub use self::context_group::{ContextGroup, ContextId};
pub use self::session::{BindLayouts, DeviceSession};

pub mod capabilities;
mod context_group;
mod session;
