//! Process-wide configuration of the reaction and the report dump
//!
//! Configuration is resolved lazily, at each corruption event, from (lowest to
//! highest precedence) built-in defaults, an optional TOML file named by
//! `SHST_CONFIG`, and the `SHST_*` environment variables. An application can
//! also install an explicit configuration, which then replaces all of them.
//!
//! # Example
//! ```
//! use shadowstack::config::{ReactionMode, ShadowConfig};
//!
//! let config = ShadowConfig::from_lookup(|key| match key {
//!     "SHST_REACTION" => Some("quiet-heal".to_string()),
//!     _ => None,
//! });
//! assert_eq!(config.reaction, ReactionMode::QuietHeal);
//! assert_eq!(config.dump.width, 16);
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;

pub const ENV_REACTION: &str = "SHST_REACTION";
pub const ENV_DUMP_WIDTH: &str = "SHST_DUMP_WIDTH";
pub const ENV_DUMP_AREA: &str = "SHST_DUMP_AREA";
pub const ENV_DUMP_HIDE_EQUAL: &str = "SHST_DUMP_HIDE_EQUAL";
pub const ENV_COLOR: &str = "SHST_COLOR";
pub const ENV_CONFIG_FILE: &str = "SHST_CONFIG";
/// `EnvFilter` directives for the library's own diagnostic logging
pub const ENV_LOG: &str = "SHST_LOG";

/// Bytes per dump line when nothing else is configured
pub const DEFAULT_DUMP_WIDTH: usize = 16;
/// Widest accepted dump line
pub const MAX_DUMP_WIDTH: usize = 256;

static OVERRIDE: RwLock<Option<ShadowConfig>> = RwLock::new(None);

/// Response to a detected corruption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionMode {
    /// Report, then terminate the process
    #[default]
    Abort,
    /// Do nothing at all
    Ignore,
    /// Report and continue with the corrupted memory in place
    Report,
    /// Report, restore the stack from the mirror, continue
    Heal,
    /// Restore the stack from the mirror without reporting
    QuietHeal,
}

impl FromStr for ReactionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "abort" => Ok(Self::Abort),
            "ignore" => Ok(Self::Ignore),
            "report" => Ok(Self::Report),
            "heal" => Ok(Self::Heal),
            "quiet-heal" => Ok(Self::QuietHeal),
            other => Err(format!(
                "unknown reaction '{other}' (expected abort, ignore, report, heal or quiet-heal)"
            )),
        }
    }
}

/// Which column(s) of the diff the reporter prints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpArea {
    #[default]
    Both,
    /// The live, possibly corrupted stack
    #[serde(alias = "original")]
    Actual,
    /// The mirrored, known-good bytes
    Shadow,
}

impl FromStr for DumpArea {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "both" => Ok(Self::Both),
            "actual" | "original" => Ok(Self::Actual),
            "shadow" => Ok(Self::Shadow),
            other => Err(format!(
                "unknown dump area '{other}' (expected both, actual or shadow)"
            )),
        }
    }
}

impl DumpArea {
    pub fn shows_actual(self) -> bool {
        matches!(self, Self::Both | Self::Actual)
    }

    pub fn shows_shadow(self) -> bool {
        matches!(self, Self::Both | Self::Shadow)
    }
}

/// Whether differing bytes are highlighted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    /// Highlight only when the report goes to an interactive terminal
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown color mode '{other}' (expected auto, always or never)"
            )),
        }
    }
}

/// Formatting of the byte-level diff dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DumpConfig {
    /// Bytes per printed line
    pub width: usize,
    pub area: DumpArea,
    /// Collapse runs of identical lines into one summary marker
    pub hide_equal_lines: bool,
    pub color: ColorMode,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_DUMP_WIDTH,
            area: DumpArea::Both,
            hide_equal_lines: false,
            color: ColorMode::Auto,
        }
    }
}

/// Complete configuration consulted at a corruption event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ShadowConfig {
    pub reaction: ReactionMode,
    pub dump: DumpConfig,
}

impl ShadowConfig {
    /// Configuration in effect right now
    ///
    /// Returns the installed override if there is one, otherwise resolves
    /// file and environment afresh.
    pub fn current() -> Self {
        let installed = match OVERRIDE.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        installed.unwrap_or_else(Self::from_env)
    }

    /// Install a configuration that takes precedence over file and environment
    pub fn install(config: ShadowConfig) {
        match OVERRIDE.write() {
            Ok(mut guard) => *guard = Some(config),
            Err(poisoned) => *poisoned.into_inner() = Some(config),
        }
    }

    /// Remove an installed configuration
    pub fn clear_override() {
        match OVERRIDE.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Resolve from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup
    ///
    /// `SHST_CONFIG` names a TOML file used as the base layer; the other
    /// `SHST_*` keys override individual fields. Malformed values keep the
    /// lower layer's value and log a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => Self::load_file(Path::new(&path)).unwrap_or_else(|e| {
                tracing::warn!("Ignoring shadow stack config file: {:#}", e);
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        config
    }

    /// Load a TOML configuration file
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse TOML configuration text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid shadow stack configuration")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_DUMP_WIDTH).contains(&self.dump.width) {
            return Err(format!(
                "dump width must be between 1 and {}, got {}",
                MAX_DUMP_WIDTH, self.dump.width
            ));
        }
        Ok(())
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_REACTION) {
            match value.parse() {
                Ok(mode) => self.reaction = mode,
                Err(e) => {
                    tracing::warn!("{}: {}; using {:?}", ENV_REACTION, e, ReactionMode::default());
                    self.reaction = ReactionMode::default();
                }
            }
        }
        if let Some(value) = lookup(ENV_DUMP_WIDTH) {
            self.dump.width = match value.trim().parse::<usize>() {
                Ok(width) if (1..=MAX_DUMP_WIDTH).contains(&width) => width,
                _ => {
                    tracing::warn!(
                        "{}: '{}' is not an integer in 1..={}; using {}",
                        ENV_DUMP_WIDTH,
                        value,
                        MAX_DUMP_WIDTH,
                        DEFAULT_DUMP_WIDTH
                    );
                    DEFAULT_DUMP_WIDTH
                }
            };
        }
        if let Some(value) = lookup(ENV_DUMP_AREA) {
            self.dump.area = value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}: {}", ENV_DUMP_AREA, e);
                DumpArea::default()
            });
        }
        if let Some(value) = lookup(ENV_DUMP_HIDE_EQUAL) {
            self.dump.hide_equal_lines = parse_flag(&value);
        }
        if let Some(value) = lookup(ENV_COLOR) {
            self.dump.color = value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}: {}", ENV_COLOR, e);
                ColorMode::default()
            });
        }
    }
}

/// `1`, `yes` and `true` (any case) are true, everything else false
fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    ["1", "yes", "true"]
        .iter()
        .any(|accepted| value.eq_ignore_ascii_case(accepted))
}
