//! Configuration for transit.
//!
//! Settings are read from `.transit/transit.toml` and layered:
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [indicator]
//! delay_ms = 250        # wait this long before showing the bar
//! color = "blue"        # bar colour
//! show_spinner = false  # animate a spinner next to the bar
//! upload_cap = 0.9      # share of the bar upload progress may fill
//!
//! [logging]
//! level = "warn"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project configuration directory.
pub const CONFIG_DIR: &str = ".transit";
/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "transit.toml";

/// Colours the terminal indicator can draw with.
pub const KNOWN_COLORS: &[&str] = &[
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

/// Upper bound on the show delay; longer values are almost certainly a typo.
const MAX_DELAY_MS: u64 = 10_000;

/// Progress indicator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Delay in milliseconds before the indicator appears
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Bar colour
    #[serde(default = "default_color")]
    pub color: String,
    /// Whether to draw a spinner next to the bar
    #[serde(default)]
    pub show_spinner: bool,
    /// Share of the bar upload progress may fill before `finish`
    #[serde(default = "default_upload_cap")]
    pub upload_cap: f64,
}

fn default_delay_ms() -> u64 {
    250
}

fn default_color() -> String {
    "blue".to_string()
}

fn default_upload_cap() -> f64 {
    crate::events::UPLOAD_PROGRESS_CAP
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            color: default_color(),
            show_spinner: false,
            upload_cap: default_upload_cap(),
        }
    }
}

impl IndicatorConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Root structure of `transit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitToml {
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransitToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse transit.toml")
    }

    /// Load from `<config_dir>/transit.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize transit.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.indicator.delay_ms > MAX_DELAY_MS {
            warnings.push(format!(
                "delay_ms {} exceeds {}ms; the indicator will rarely appear",
                self.indicator.delay_ms, MAX_DELAY_MS
            ));
        }

        if !(self.indicator.upload_cap > 0.0 && self.indicator.upload_cap <= 1.0) {
            warnings.push(format!(
                "upload_cap {} should be in (0, 1]",
                self.indicator.upload_cap
            ));
        }

        if !is_known_color(&self.indicator.color) {
            warnings.push(format!(
                "Unknown color '{}'. Valid values: {}",
                self.indicator.color,
                KNOWN_COLORS.join(", ")
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid log level '{}'", self.logging.level));
        }

        warnings
    }
}

pub fn is_known_color(color: &str) -> bool {
    KNOWN_COLORS.contains(&color.to_lowercase().as_str())
}

/// Effective configuration for a run.
///
/// Merges settings from:
/// 1. transit.toml
/// 2. Environment variables (`TRANSIT_DELAY_MS`, `TRANSIT_COLOR`)
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct TransitConfig {
    /// Path to the .transit directory
    pub config_dir: PathBuf,
    /// Parsed transit.toml
    pub toml: TransitToml,
    /// CLI override for the show delay
    pub cli_delay_ms: Option<u64>,
    /// CLI override: never draw the spinner
    pub cli_no_spinner: bool,
}

impl TransitConfig {
    /// Load the configuration for a project directory.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = TransitToml::load_or_default(&config_dir)?;
        Ok(Self {
            config_dir,
            toml,
            cli_delay_ms: None,
            cli_no_spinner: false,
        })
    }

    /// Load the configuration and apply CLI overrides.
    pub fn with_cli_args(
        project_dir: &Path,
        delay_ms: Option<u64>,
        no_spinner: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_delay_ms = delay_ms;
        config.cli_no_spinner = no_spinner;
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Show delay (CLI → env → file).
    pub fn delay_ms(&self) -> u64 {
        self.cli_delay_ms
            .or_else(|| {
                std::env::var("TRANSIT_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(self.toml.indicator.delay_ms)
    }

    /// Bar colour (env → file).
    pub fn color(&self) -> String {
        std::env::var("TRANSIT_COLOR")
            .ok()
            .filter(|c| is_known_color(c))
            .unwrap_or_else(|| self.toml.indicator.color.clone())
    }

    /// Indicator settings with every override applied.
    pub fn indicator(&self) -> IndicatorConfig {
        IndicatorConfig {
            delay_ms: self.delay_ms(),
            color: self.color(),
            show_spinner: self.toml.indicator.show_spinner && !self.cli_no_spinner,
            upload_cap: self.toml.indicator.upload_cap,
        }
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.toml.logging
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
