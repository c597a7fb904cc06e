use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// Virtual key code of the Escape key.
pub const ESCAPE_KEY_CODE: i64 = 53;

/// Persisted global hotkey binding: one physical key plus an exact set of
/// required modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyBinding {
    /// Virtual key code of the trigger key
    pub key_code: i64,
    /// Option/Alt must be held
    pub needs_option: bool,
    /// Command must be held
    pub needs_command: bool,
    /// Control must be held
    pub needs_control: bool,
    /// Shift must be held
    pub needs_shift: bool,
}

impl Default for HotkeyBinding {
    /// Command+Backslash
    fn default() -> Self {
        Self {
            key_code: 42,
            needs_option: false,
            needs_command: true,
            needs_control: false,
            needs_shift: false,
        }
    }
}

impl HotkeyBinding {
    /// Human-readable chord name, e.g. `⌘\`
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut parts = String::new();
        if self.needs_control {
            parts.push('⌃');
        }
        if self.needs_option {
            parts.push('⌥');
        }
        if self.needs_shift {
            parts.push('⇧');
        }
        if self.needs_command {
            parts.push('⌘');
        }
        parts.push_str(&key_name(self.key_code));
        parts
    }
}

/// Name for a macOS virtual key code, falling back to `Key<n>`.
#[must_use]
pub fn key_name(key_code: i64) -> String {
    let name = match key_code {
        0 => "A",
        1 => "S",
        2 => "D",
        3 => "F",
        4 => "H",
        5 => "G",
        6 => "Z",
        7 => "X",
        8 => "C",
        9 => "V",
        11 => "B",
        12 => "Q",
        13 => "W",
        14 => "E",
        15 => "R",
        16 => "Y",
        17 => "T",
        31 => "O",
        32 => "U",
        34 => "I",
        35 => "P",
        36 => "Return",
        37 => "L",
        38 => "J",
        40 => "K",
        42 => "\\",
        45 => "N",
        46 => "M",
        48 => "Tab",
        49 => "Space",
        51 => "Delete",
        53 => "Esc",
        123 => "←",
        124 => "→",
        125 => "↓",
        126 => "↑",
        _ => return format!("Key{key_code}"),
    };
    name.to_owned()
}

/// Full application configuration, persisted as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Global hotkey chord
    #[serde(default)]
    pub hotkey: HotkeyBinding,
    /// Recognition model settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Write-ahead backup settings
    #[serde(default)]
    pub backup: BackupConfig,
    /// Logging settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Dictation history settings
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Speech model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the ggml model file (`~` is expanded)
    pub path: String,
    /// CPU threads for inference
    pub threads: usize,
    /// Beam search width (1 = greedy)
    pub beam_size: usize,
    /// Language code, `None` = auto-detect
    pub language: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "~/.voicekey/models/ggml-base.bin".to_owned(),
            threads: 4,
            beam_size: 5,
            language: None,
        }
    }
}

/// Backup file location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding the in-progress recording backup
    pub dir: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: "~/.voicekey".to_owned(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location (`~` is expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.voicekey/voicekey.log".to_owned(),
        }
    }
}

/// History database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQLite database path (`~` is expanded)
    pub db_path: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.voicekey/history.db".to_owned(),
        }
    }
}

impl Config {
    /// Default config file location: `~/.voicekey.toml`
    ///
    /// # Errors
    /// Returns error if `HOME` is not set.
    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".voicekey.toml"))
    }

    /// Expand `~` in paths to the home directory
    ///
    /// # Errors
    /// Returns error if `HOME` is not set while the path needs it.
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

/// Narrow persistence seam for the hotkey binding.
///
/// The key-event interceptor calls [`ConfigStore::load`] on every hardware
/// event, so implementations must keep `load` free of I/O and heavy locking.
pub trait ConfigStore: Send + Sync {
    /// Current binding
    fn load(&self) -> HotkeyBinding;

    /// Persist a new binding; takes effect on the next key event
    ///
    /// # Errors
    /// Returns error if the binding cannot be written to storage.
    fn save(&self, binding: HotkeyBinding) -> Result<()>;
}

/// TOML-file-backed [`ConfigStore`] holding the full [`Config`] in memory.
pub struct TomlConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
}

impl TomlConfigStore {
    /// Open the config file, creating a default one if absent.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, created, or parsed.
    pub fn open(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            Self::create_default(&path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// Snapshot of the full configuration
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.current
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[hotkey]
key_code = 42
needs_option = false
needs_command = true
needs_control = false
needs_shift = false

[model]
path = "~/.voicekey/models/ggml-base.bin"
threads = 4
beam_size = 5

[backup]
dir = "~/.voicekey"

[telemetry]
enabled = true
log_path = "~/.voicekey/voicekey.log"

[history]
db_path = "~/.voicekey/history.db"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> HotkeyBinding {
        self.current.read().map(|c| c.hotkey).unwrap_or_default()
    }

    fn save(&self, binding: HotkeyBinding) -> Result<()> {
        let serialized = {
            let mut config = self
                .current
                .write()
                .map_err(|_| anyhow::anyhow!("config lock poisoned"))?;
            config.hotkey = binding;
            toml::to_string_pretty(&*config).context("failed to serialize config")?
        };
        fs::write(&self.path, serialized).context("failed to write config file")?;
        tracing::info!(binding = %binding.display_name(), "hotkey binding saved");
        Ok(())
    }
}
