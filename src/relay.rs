//! Stream relay and session lifecycle controller.
//!
//! The controller sits between the client streams, the session handler and
//! the backend socket. It starts out feeding the client to the session
//! handler, splices the client onto the backend once the handler reports it
//! ready, and runs the shutdown procedure when the session ends.
//!
//! # Module Structure
//!
//! - `session` - per-epoch state and the lifecycle phase machine
//! - `deferred` - settable value awaited by many waiters
//! - `router` - single-slot input/output routes with shadow copies
//! - `interception` - fire-once subscriptions on lifecycle messages
//! - `controller` - the actor owning all of the above
//! - `shutdown` - the shutdown procedure and its triggers
//! - `traffic` - debug log of relayed messages

mod controller;
mod deferred;
mod interception;
mod router;
mod session;
mod shutdown;
mod traffic;

pub use controller::{RelayController, RelayHandle, RelaySnapshot};
pub use deferred::Deferred;
pub use router::{BoxedReader, BoxedWriter, InputRoute, InputRouter, OutputRoute, OutputRouter};
pub use session::{LifecyclePhase, Session, SessionMode};
pub use shutdown::{SessionOutcome, ShutdownTrigger};
