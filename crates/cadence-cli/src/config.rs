//! Demo configuration – reads/writes `~/.cadence/config.toml`.

use cadence_types::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted settings for the `cadence` demo run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler tuning (period, pending passes, overrun reporting).
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Number of scheduler cycles to run before exiting.
    #[serde(default = "default_cycles")]
    pub cycles: u64,

    /// Cycle at which the simulated robot is disabled.  `None` keeps it
    /// enabled for the whole run.
    #[serde(default = "default_disable_at_cycle")]
    pub disable_at_cycle: Option<u64>,
}

fn default_cycles() -> u64 {
    250
}
fn default_disable_at_cycle() -> Option<u64> {
    Some(200)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cycles: default_cycles(),
            disable_at_cycle: default_disable_at_cycle(),
        }
    }
}

/// Return the path to `~/.cadence/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cadence").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `CADENCE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CADENCE_PERIOD_MS` | `scheduler.period_ms` |
/// | `CADENCE_CYCLES` | `cycles` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CADENCE_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.scheduler.period_ms = ms;
    }
    if let Ok(v) = std::env::var("CADENCE_CYCLES")
        && let Ok(cycles) = v.parse::<u64>()
    {
        cfg.cycles = cycles;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.scheduler.period_ms, 20);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cycles = 12\n\n[scheduler]\nperiod_ms = 5\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.cycles, 12);
        assert_eq!(loaded.scheduler.period_ms, 5);
        assert_eq!(loaded.scheduler.max_pending_passes, 8);
        assert_eq!(loaded.disable_at_cycle, Some(200));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cycles = \"many\"").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_cadence_dir() {
        let p = config_path_for_home("/home/driver");
        assert!(p.to_string_lossy().contains(".cadence"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("CADENCE_PERIOD_MS", "10");
            std::env::set_var("CADENCE_CYCLES", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.scheduler.period_ms, 10);
        assert_eq!(cfg.cycles, 250);
        unsafe {
            std::env::remove_var("CADENCE_PERIOD_MS");
            std::env::remove_var("CADENCE_CYCLES");
        }
    }
}
