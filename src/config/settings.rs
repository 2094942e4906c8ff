//! Configuration layers and the resolved relay configuration.
//!
//! A [`ConfigLayer`] mirrors the TOML file: every field is optional so that
//! layers can be merged with later layers taking precedence. Resolving the
//! merged layer fills the gaps with programmed defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One configuration source as written in `debug-relay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigLayer {
    pub shutdown: Option<ShutdownLayer>,
    pub backend: Option<BackendLayer>,
}

/// `[shutdown]` section. All values are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ShutdownLayer {
    pub disconnect_request_delay_ms: Option<u64>,
    pub terminated_event_delay_ms: Option<u64>,
    pub disconnect_response_delay_ms: Option<u64>,
    pub kill_grace_ms: Option<u64>,
    pub dispose_grace_ms: Option<u64>,
}

/// `[backend]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackendLayer {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub host: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub connect_retry_interval_ms: Option<u64>,
}

/// Merge two layers, preferring values from `primary` over `fallback`.
pub fn merge_layers(fallback: ConfigLayer, primary: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
        shutdown: merge_option(fallback.shutdown, primary.shutdown, merge_shutdown),
        backend: merge_option(fallback.backend, primary.backend, merge_backend),
    }
}

/// Merge any number of layers, lowest precedence first.
pub fn merge_all(layers: impl IntoIterator<Item = Option<ConfigLayer>>) -> ConfigLayer {
    layers
        .into_iter()
        .flatten()
        .fold(ConfigLayer::default(), merge_layers)
}

fn merge_option<T>(fallback: Option<T>, primary: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (fallback, primary) {
        (Some(fallback), Some(primary)) => Some(merge(fallback, primary)),
        (fallback, primary) => primary.or(fallback),
    }
}

fn merge_shutdown(fallback: ShutdownLayer, primary: ShutdownLayer) -> ShutdownLayer {
    ShutdownLayer {
        disconnect_request_delay_ms: primary
            .disconnect_request_delay_ms
            .or(fallback.disconnect_request_delay_ms),
        terminated_event_delay_ms: primary
            .terminated_event_delay_ms
            .or(fallback.terminated_event_delay_ms),
        disconnect_response_delay_ms: primary
            .disconnect_response_delay_ms
            .or(fallback.disconnect_response_delay_ms),
        kill_grace_ms: primary.kill_grace_ms.or(fallback.kill_grace_ms),
        dispose_grace_ms: primary.dispose_grace_ms.or(fallback.dispose_grace_ms),
    }
}

fn merge_backend(fallback: BackendLayer, primary: BackendLayer) -> BackendLayer {
    BackendLayer {
        // The command and its arguments travel together
        args: if primary.command.is_some() {
            primary.args
        } else {
            primary.args.or(fallback.args)
        },
        command: primary.command.or(fallback.command),
        host: primary.host.or(fallback.host),
        connect_timeout_ms: primary.connect_timeout_ms.or(fallback.connect_timeout_ms),
        connect_retry_interval_ms: primary
            .connect_retry_interval_ms
            .or(fallback.connect_retry_interval_ms),
    }
}

/// Delays applied by the shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownDelays {
    /// Wait after a client `disconnect` request before shutting down.
    pub disconnect_request: Duration,
    /// Wait after a `terminated` event before shutting down.
    pub terminated_event: Duration,
    /// Wait after a `disconnect` response before shutting down.
    pub disconnect_response: Duration,
    /// Wait before killing the launched backend process tree.
    pub kill_grace: Duration,
    /// Wait between session handler shutdown and disposal.
    pub dispose_grace: Duration,
}

impl Default for ShutdownDelays {
    fn default() -> Self {
        Self {
            disconnect_request: Duration::from_millis(500),
            terminated_event: Duration::from_millis(300),
            disconnect_response: Duration::from_millis(100),
            kill_grace: Duration::from_millis(100),
            dispose_grace: Duration::from_millis(100),
        }
    }
}

impl ShutdownDelays {
    /// Zero delays, useful when ordering matters but timing does not.
    pub fn immediate() -> Self {
        Self {
            disconnect_request: Duration::ZERO,
            terminated_event: Duration::ZERO,
            disconnect_response: Duration::ZERO,
            kill_grace: Duration::ZERO,
            dispose_grace: Duration::ZERO,
        }
    }

    fn from_layer(layer: ShutdownLayer) -> Self {
        let defaults = Self::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        Self {
            disconnect_request: ms(layer.disconnect_request_delay_ms, defaults.disconnect_request),
            terminated_event: ms(layer.terminated_event_delay_ms, defaults.terminated_event),
            disconnect_response: ms(
                layer.disconnect_response_delay_ms,
                defaults.disconnect_response,
            ),
            kill_grace: ms(layer.kill_grace_ms, defaults.kill_grace),
            dispose_grace: ms(layer.dispose_grace_ms, defaults.dispose_grace),
        }
    }
}

/// How the default launcher starts and reaches a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Program to spawn for `launch` sessions. `None` disables launching.
    pub command: Option<String>,
    /// Arguments; `{host}` and `{port}` are substituted.
    pub args: Vec<String>,
    /// Loopback host the spawned backend listens on.
    pub host: String,
    pub connect_timeout: Duration,
    pub connect_retry_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(10),
            connect_retry_interval: Duration::from_millis(100),
        }
    }
}

impl BackendConfig {
    fn from_layer(layer: BackendLayer) -> Self {
        let defaults = Self::default();
        Self {
            command: layer.command.or(defaults.command),
            args: layer.args.unwrap_or(defaults.args),
            host: layer.host.unwrap_or(defaults.host),
            connect_timeout: layer
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            connect_retry_interval: layer
                .connect_retry_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_retry_interval),
        }
    }

    /// Command arguments with `{host}` and `{port}` replaced.
    pub fn substitute_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", &self.host).replace("{port}", &port))
            .collect()
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    pub shutdown: ShutdownDelays,
    pub backend: BackendConfig,
}

impl From<ConfigLayer> for RelayConfig {
    fn from(layer: ConfigLayer) -> Self {
        Self {
            shutdown: ShutdownDelays::from_layer(layer.shutdown.unwrap_or_default()),
            backend: BackendConfig::from_layer(layer.backend.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layer_resolves_to_defaults() {
        let config = RelayConfig::from(ConfigLayer::default());

        assert_eq!(config.shutdown.disconnect_request, Duration::from_millis(500));
        assert_eq!(config.shutdown.terminated_event, Duration::from_millis(300));
        assert_eq!(config.shutdown.disconnect_response, Duration::from_millis(100));
        assert_eq!(config.shutdown.kill_grace, Duration::from_millis(100));
        assert_eq!(config.shutdown.dispose_grace, Duration::from_millis(100));
        assert_eq!(config.backend.host, "127.0.0.1");
        assert!(config.backend.command.is_none());
    }

    #[test]
    fn toml_uses_kebab_case_sections() {
        let layer: ConfigLayer = toml::from_str(
            r#"
            [shutdown]
            terminated-event-delay-ms = 50

            [backend]
            command = "python3"
            args = ["-m", "debugpy.adapter", "--port", "{port}"]
            "#,
        )
        .unwrap();

        let config = RelayConfig::from(layer);
        assert_eq!(config.shutdown.terminated_event, Duration::from_millis(50));
        assert_eq!(config.shutdown.disconnect_request, Duration::from_millis(500));
        assert_eq!(config.backend.command.as_deref(), Some("python3"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = toml::from_str::<ConfigLayer>("[shutdown]\nkill-delay = 1\n");
        assert!(result.is_err(), "typos in config keys should not pass silently");
    }

    #[test]
    fn primary_layer_overrides_fallback_per_field() {
        let fallback = ConfigLayer {
            shutdown: Some(ShutdownLayer {
                kill_grace_ms: Some(10),
                dispose_grace_ms: Some(20),
                ..Default::default()
            }),
            backend: None,
        };
        let primary = ConfigLayer {
            shutdown: Some(ShutdownLayer {
                kill_grace_ms: Some(99),
                ..Default::default()
            }),
            backend: None,
        };

        let merged = merge_layers(fallback, primary);
        let shutdown = merged.shutdown.unwrap();
        assert_eq!(shutdown.kill_grace_ms, Some(99));
        assert_eq!(shutdown.dispose_grace_ms, Some(20));
    }

    #[test]
    fn overriding_command_drops_fallback_args() {
        let fallback = ConfigLayer {
            shutdown: None,
            backend: Some(BackendLayer {
                command: Some("node".to_string()),
                args: Some(vec!["adapter.js".to_string()]),
                ..Default::default()
            }),
        };
        let primary = ConfigLayer {
            shutdown: None,
            backend: Some(BackendLayer {
                command: Some("dlv".to_string()),
                ..Default::default()
            }),
        };

        let backend = merge_layers(fallback, primary).backend.unwrap();
        assert_eq!(backend.command.as_deref(), Some("dlv"));
        assert_eq!(backend.args, None);
    }

    #[test]
    fn substitute_args_replaces_host_and_port() {
        let backend = BackendConfig {
            args: vec!["--listen={host}:{port}".to_string(), "plain".to_string()],
            ..Default::default()
        };

        assert_eq!(
            backend.substitute_args(5678),
            vec!["--listen=127.0.0.1:5678".to_string(), "plain".to_string()]
        );
    }
}
