pub mod component;
pub mod config;
pub mod error;
pub mod group;
mod registry;
pub mod signal;

pub use component::{Component, Finalizer, Initializer};
pub use config::{ConfigError, GroupConfig, TimeoutSettings, DEFAULT_TIMEOUT};
pub use error::{join_outcomes, BoxError, GroupError, JoinedError, Outcome, Phase};
pub use group::Group;
pub use signal::{ShutdownSignal, SignalHandler};
pub use tokio_util::sync::CancellationToken;
