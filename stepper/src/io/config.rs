//! Stepper configuration stored in `stepper.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// File name looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "stepper.toml";

/// Stepper configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepperConfig {
    /// Confirm every step before it runs.
    pub ask: bool,

    /// Base directory for relative unit paths. Relative to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_dir: Option<PathBuf>,

    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Upper bound on host-loop ticks per run (`0` = unbounded).
    pub max_ticks: u64,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            ask: false,
            unit_dir: None,
            log_filter: "warn".to_string(),
            max_ticks: 0,
        }
    }
}

impl StepperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_filter.trim().is_empty() {
            return Err(anyhow!("log_filter must not be empty"));
        }
        EnvFilter::try_new(&self.log_filter)
            .with_context(|| format!("log_filter {:?} is not a valid filter", self.log_filter))?;
        if self
            .unit_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(anyhow!("unit_dir must not be empty when set"));
        }
        Ok(())
    }

    /// `unit_dir` resolved against the directory holding `config_path`.
    pub fn resolved_unit_dir(&self, config_path: &Path) -> Option<PathBuf> {
        let dir = self.unit_dir.as_ref()?;
        if dir.is_absolute() {
            return Some(dir.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(dir))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StepperConfig::default()`.
pub fn load_config(path: &Path) -> Result<StepperConfig> {
    if !path.exists() {
        let cfg = StepperConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StepperConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StepperConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
