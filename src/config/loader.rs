use std::fs;
use std::path::{Path, PathBuf};

use super::settings::{ConfigLayer, RelayConfig, merge_all};

const APP_DIR: &str = "debug-relay";
const CONFIG_FILE: &str = "debug-relay.toml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigEventKind {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEvent {
    pub kind: ConfigEventKind,
    pub message: String,
}

impl ConfigEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ConfigEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: ConfigEventKind::Warning,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoadOutcome {
    pub config: RelayConfig,
    pub events: Vec<ConfigEvent>,
}

/// Where each configuration layer comes from.
#[derive(Debug, Default, Clone)]
pub struct ConfigSources {
    /// User-wide file; `None` skips the layer.
    pub user_file: Option<PathBuf>,
    /// File passed with `--config`.
    pub explicit_file: Option<PathBuf>,
    /// Command-line overrides, highest precedence.
    pub overrides: Option<ConfigLayer>,
}

impl ConfigSources {
    /// Sources using the platform user config location.
    pub fn with_user_config() -> Self {
        Self {
            user_file: user_config_path(),
            ..Self::default()
        }
    }
}

/// Returns `<config dir>/debug-relay/debug-relay.toml`.
///
/// `None` if the platform has no config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load and merge every layer: defaults < user < explicit < overrides.
///
/// A missing user file is silent; a missing explicit file, or any file that
/// fails to parse, becomes a warning and the layer is skipped.
pub fn load_config(sources: &ConfigSources) -> ConfigLoadOutcome {
    let mut events = Vec::new();

    let user = sources
        .user_file
        .as_deref()
        .and_then(|path| load_optional_layer(path, "user config", &mut events));

    let explicit = sources
        .explicit_file
        .as_deref()
        .and_then(|path| load_required_layer(path, &mut events));

    let config = RelayConfig::from(merge_all([user, explicit, sources.overrides.clone()]));

    ConfigLoadOutcome { config, events }
}

fn load_optional_layer(
    path: &Path,
    description: &str,
    events: &mut Vec<ConfigEvent>,
) -> Option<ConfigLayer> {
    if !path.exists() {
        return None;
    }
    let layer = read_layer(path, events)?;
    events.push(ConfigEvent::info(format!(
        "Loaded {} from {}",
        description,
        path.display()
    )));
    Some(layer)
}

fn load_required_layer(path: &Path, events: &mut Vec<ConfigEvent>) -> Option<ConfigLayer> {
    if !path.exists() {
        events.push(ConfigEvent::warning(format!(
            "Config file not found: {}",
            path.display()
        )));
        return None;
    }
    let layer = read_layer(path, events)?;
    events.push(ConfigEvent::info(format!(
        "Loaded config file {}",
        path.display()
    )));
    Some(layer)
}

fn read_layer(path: &Path, events: &mut Vec<ConfigEvent>) -> Option<ConfigLayer> {
    match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<ConfigLayer>(&contents) {
            Ok(layer) => Some(layer),
            Err(err) => {
                events.push(ConfigEvent::warning(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    err
                )));
                None
            }
        },
        Err(err) => {
            events.push(ConfigEvent::warning(format!(
                "Failed to read {}: {}",
                path.display(),
                err
            )));
            None
        }
    }
}
