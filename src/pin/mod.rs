//! Pin subscriptions
//!
//! - task: the parent/child cancellation tree with idle auto-close
//! - request: pin requests and the requester delivery contract
//! - machine: the per-request state machine
//! - host: the session root owning app instances

pub mod host;
pub mod machine;
pub mod request;
pub mod task;

pub use host::{AppInstance, Host};
pub use machine::{PinState, PinUplink};
pub use request::{PinError, PinRequest, PinTarget, Requester, SharedRequester, SyncMode};
pub use task::{Task, TaskError};
