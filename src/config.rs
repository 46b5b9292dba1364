use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, VivaError};

const fn default_chunk_samples() -> usize {
    4096
}

fn default_model() -> String {
    "gemini-2.5-flash-native-audio-preview-09-2025".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

const fn default_outbox_capacity() -> usize {
    64
}

const fn default_true() -> bool {
    true
}

const fn default_width() -> usize {
    48
}

const fn default_fps() -> u32 {
    30
}

/// Environment variables consulted, in order, when `live.api_key` is unset.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub visualizer: VisualizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub input_device: Option<String>,

    pub output_device: Option<String>,

    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            chunk_samples: default_chunk_samples(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Encoded chunks held while the session is still opening.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            voice: default_voice(),
            endpoint: default_endpoint(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl LiveConfig {
    /// The credential for the remote service, from config or the environment.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileConfig {
    /// YAML resume profile. The bundled sample profile is used when unset.
    pub path: Option<String>,

    /// Free-text line describing what the persona is doing right now.
    pub situation: Option<String>,

    /// How the persona tells people to reach them.
    pub contact_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisualizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_width")]
    pub width: usize,

    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_width(),
            fps: default_fps(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VivaError::Config(format!(
                "config file not found: {}; create it or pass --config with an existing path",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            VivaError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            VivaError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the default path, falling back to
    /// built-in defaults when the default file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default = Self::default_path();
        if default.exists() {
            Self::load(&default)
        } else {
            tracing::debug!(
                "no config at {}, using built-in defaults",
                default.display()
            );
            Ok(Self::default())
        }
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("vivavoce/config.yaml")
    }

    /// Expand `~` in a path string to the user's home directory.
    #[must_use]
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.chunk_samples == 0 {
            return Err(VivaError::Config(
                "audio.chunk_samples must be greater than zero".to_string(),
            ));
        }
        if self.live.outbox_capacity == 0 {
            return Err(VivaError::Config(
                "live.outbox_capacity must be greater than zero".to_string(),
            ));
        }
        if self.visualizer.fps == 0 {
            return Err(VivaError::Config(
                "visualizer.fps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
