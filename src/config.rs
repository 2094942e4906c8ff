//! Relay configuration.
//!
//! Layers, lowest precedence first: programmed defaults, the user file at
//! `<config dir>/debug-relay/debug-relay.toml`, the `--config` file, then
//! command-line overrides.

pub mod loader;
pub mod settings;

pub use loader::{
    ConfigEvent, ConfigEventKind, ConfigLoadOutcome, ConfigSources, load_config, user_config_path,
};
pub use settings::{
    BackendConfig, BackendLayer, ConfigLayer, RelayConfig, ShutdownDelays, ShutdownLayer,
    merge_all, merge_layers,
};
