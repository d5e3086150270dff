//! Configuration Vault – reads/writes `~/.vigil/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use vigil_kernel::Thresholds;
use vigil_runtime::SafetyConfig;

/// Which collaborator set the binary wires the kernel to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Scripted in-process fakes.
    #[default]
    Sim,
    /// Linux `/proc` metrics, OS threads, dry-run power control.
    Proc,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Sim => write!(f, "sim"),
            Driver::Proc => write!(f, "proc"),
        }
    }
}

impl std::str::FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(Driver::Sim),
            "proc" => Ok(Driver::Proc),
            other => Err(format!("unknown driver '{other}' (expected sim or proc)")),
        }
    }
}

/// Persisted configuration stored in `~/.vigil/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Health loop period in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Alert deliveries slower than this are logged.
    #[serde(default = "default_alert_latency_budget_ms")]
    pub alert_latency_budget_ms: u64,

    #[serde(default)]
    pub driver: Driver,

    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_sample_interval_ms() -> u64 {
    1000
}
fn default_alert_latency_budget_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            alert_latency_budget_ms: default_alert_latency_budget_ms(),
            driver: Driver::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    /// Runtime settings derived from this file.
    pub fn safety_config(&self) -> SafetyConfig {
        SafetyConfig {
            thresholds: self.thresholds.clone(),
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            alert_latency_budget: Duration::from_millis(self.alert_latency_budget_ms),
        }
    }
}

/// Return the path to `~/.vigil/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".vigil").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `VIGIL_*` environment variable overrides to `cfg`.  Values that do
/// not parse, or are not positive where a period is expected, are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `VIGIL_SAMPLE_INTERVAL_MS` | `sample_interval_ms` |
/// | `VIGIL_DRIVER` | `driver` |
/// | `VIGIL_MAX_IO_LATENCY_MS` | `thresholds.max_io_latency_ms` |
/// | `VIGIL_MAX_LOAD` | `thresholds.max_load_average` |
/// | `VIGIL_CRITICAL_FREE_MEM_KB` | `thresholds.critical_free_memory_kb` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("VIGIL_SAMPLE_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.sample_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("VIGIL_DRIVER")
        && let Ok(driver) = v.parse::<Driver>()
    {
        cfg.driver = driver;
    }
    if let Ok(v) = std::env::var("VIGIL_MAX_IO_LATENCY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.thresholds.max_io_latency_ms = ms;
    }
    if let Ok(v) = std::env::var("VIGIL_MAX_LOAD")
        && let Ok(load) = v.parse::<f64>()
        && load.is_finite()
        && load > 0.0
    {
        cfg.thresholds.max_load_average = load;
    }
    if let Ok(v) = std::env::var("VIGIL_CRITICAL_FREE_MEM_KB")
        && let Ok(kb) = v.parse::<u64>()
    {
        cfg.thresholds.critical_free_memory_kb = kb;
    }
}

/// Save the config to disk, creating `~/.vigil/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Thresholds are safety settings; keep the file owner-only on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
