pub mod backend;
pub mod config;
pub mod disposable;
pub mod error;
pub mod fatal;
pub mod host;
pub mod process;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future used at trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use config::RelayConfig;
pub use error::{CodecError, RelayError, RelayResult};
pub use host::RelayHost;
pub use relay::{RelayController, RelayHandle, SessionOutcome};
