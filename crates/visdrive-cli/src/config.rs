//! Configuration Vault – reads/writes `~/.visdrive/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use visdrive_hal::PinMap;
use visdrive_runtime::{OracleStrategy, SessionConfig};
use visdrive_types::{DriveError, Vocabulary};
use zeroize::Zeroize;

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[session]` – timing and drive strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_pause_ms")]
    pub inter_cycle_pause_ms: u64,
    /// Percent, 0–100.
    #[serde(default = "default_duty_cycle")]
    pub duty_cycle: u8,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            inter_cycle_pause_ms: default_pause_ms(),
            duty_cycle: default_duty_cycle(),
        }
    }
}

/// `[oracle]` – the vision endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub strategy: OracleStrategy,
    #[serde(default)]
    pub vocabulary: Vocabulary,
    /// Stored as plain text; the file is written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            strategy: OracleStrategy::default(),
            vocabulary: Vocabulary::default(),
            api_key: String::new(),
        }
    }
}

impl Drop for OracleSection {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl std::fmt::Debug for OracleSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleSection")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("strategy", &self.strategy)
            .field("vocabulary", &self.vocabulary)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// Which pin backend drives the motors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-memory pins; nothing moves.
    #[default]
    Sim,
    /// Linux `/sys/class/gpio` + `/sys/class/pwm`.
    Sysfs,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
            Backend::Sysfs => write!(f, "sysfs"),
        }
    }
}

/// `[hardware]` – where frames come from and where pins live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSection {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default = "default_pwm_root")]
    pub pwm_root: PathBuf,
    #[serde(default)]
    pub pwm_chip: u32,
    /// Replay JPEGs from this directory instead of the simulated camera.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_dir: Option<PathBuf>,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            gpio_root: default_gpio_root(),
            pwm_root: default_pwm_root(),
            pwm_chip: 0,
            frames_dir: None,
        }
    }
}

/// Persisted user configuration stored in `~/.visdrive/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub pins: PinMap,
    #[serde(default)]
    pub hardware: HardwareSection,
}

impl Config {
    /// Validated runtime projection of `[session]` plus the oracle
    /// vocabulary.
    ///
    /// # Errors
    ///
    /// [`DriveError::InvalidConfig`] for a duty cycle above 100 or a zero
    /// oracle timeout.
    pub fn to_session_config(&self) -> Result<SessionConfig, DriveError> {
        SessionConfig::new(
            Duration::from_secs(self.session.duration_secs),
            Duration::from_secs(self.session.oracle_timeout_secs),
            Duration::from_millis(self.session.inter_cycle_pause_ms),
            self.session.duty_cycle,
            self.oracle.vocabulary,
        )
    }
}

fn default_duration_secs() -> u64 {
    60
}
fn default_oracle_timeout_secs() -> u64 {
    10
}
fn default_pause_ms() -> u64 {
    1000
}
fn default_duty_cycle() -> u8 {
    75
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}
fn default_pwm_root() -> PathBuf {
    PathBuf::from("/sys/class/pwm")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.visdrive/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".visdrive").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
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

/// Apply `VISDRIVE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `VISDRIVE_ORACLE_URL` | `oracle.base_url` |
/// | `VISDRIVE_MODEL` | `oracle.model` |
/// | `VISDRIVE_DURATION_SECS` | `session.duration_secs` |
/// | `VISDRIVE_DUTY_CYCLE` | `session.duty_cycle` |
/// | `VISDRIVE_API_KEY`, else `OPENAI_API_KEY` | `oracle.api_key` |
///
/// Numeric values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("VISDRIVE_ORACLE_URL") {
        cfg.oracle.base_url = v;
    }
    if let Ok(v) = std::env::var("VISDRIVE_MODEL") {
        cfg.oracle.model = v;
    }
    if let Ok(v) = std::env::var("VISDRIVE_DURATION_SECS")
        && let Ok(secs) = v.trim().parse::<u64>()
    {
        cfg.session.duration_secs = secs;
    }
    if let Ok(v) = std::env::var("VISDRIVE_DUTY_CYCLE")
        && let Ok(duty) = v.trim().parse::<u8>()
    {
        cfg.session.duty_cycle = duty;
    }
    if let Ok(key) = std::env::var("VISDRIVE_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
    {
        cfg.oracle.api_key.zeroize();
        cfg.oracle.api_key = key;
    }
}

/// Save the config to disk, creating `~/.visdrive/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests mutate process state; run them one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn debug_redacts_api_key() {
        let mut cfg = Config::default();
        cfg.oracle.api_key = "sk-super-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn defaults_match_the_reference_wiring() {
        let cfg = Config::default();
        assert_eq!(cfg.session.duration_secs, 60);
        assert_eq!(cfg.session.oracle_timeout_secs, 10);
        assert_eq!(cfg.session.inter_cycle_pause_ms, 1000);
        assert_eq!(cfg.session.duty_cycle, 75);
        assert_eq!(cfg.oracle.model, "gpt-4o");
        assert_eq!(cfg.oracle.strategy, OracleStrategy::Structured);
        assert_eq!(cfg.pins.left.in_a, 24);
        assert_eq!(cfg.pins.right.enable, 22);
        assert_eq!(cfg.hardware.backend, Backend::Sim);
        assert!(cfg.hardware.frames_dir.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let raw = r#"
            [session]
            duration_secs = 5

            [oracle]
            strategy = "two_call"
            vocabulary = "motion"

            [hardware]
            backend = "sysfs"
            frames_dir = "/tmp/frames"
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.session.duration_secs, 5);
        assert_eq!(cfg.session.duty_cycle, 75);
        assert_eq!(cfg.oracle.strategy, OracleStrategy::TwoCall);
        assert_eq!(cfg.oracle.vocabulary, Vocabulary::Motion);
        assert_eq!(cfg.oracle.base_url, "https://api.openai.com");
        assert_eq!(cfg.hardware.backend, Backend::Sysfs);
        assert_eq!(cfg.hardware.frames_dir, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(cfg.pins, PinMap::default());
    }

    #[test]
    fn session_config_projection_validates() {
        let mut cfg = Config::default();
        let session = cfg.to_session_config().expect("defaults are valid");
        assert_eq!(session.duration, Duration::from_secs(60));
        assert_eq!(session.duty_cycle.percent(), 75);

        cfg.session.duty_cycle = 101;
        assert!(matches!(
            cfg.to_session_config(),
            Err(DriveError::InvalidConfig(_))
        ));

        cfg.session.duty_cycle = 50;
        cfg.session.oracle_timeout_secs = 0;
        assert!(matches!(
            cfg.to_session_config(),
            Err(DriveError::InvalidConfig(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.session, SessionSection::default());
        assert_eq!(loaded.pins, PinMap::default());
        assert_eq!(loaded.hardware, HardwareSection::default());
        assert_eq!(loaded.oracle.model, "gpt-4o");
    }

    #[test]
    fn config_path_points_to_visdrive_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".visdrive"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_replace_url_and_model() {
        let _env = ENV_LOCK.lock().unwrap();
        // SAFETY: serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("VISDRIVE_ORACLE_URL", "http://rover-host:8000");
            std::env::set_var("VISDRIVE_MODEL", "llava");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.oracle.base_url, "http://rover-host:8000");
        assert_eq!(cfg.oracle.model, "llava");
        unsafe {
            std::env::remove_var("VISDRIVE_ORACLE_URL");
            std::env::remove_var("VISDRIVE_MODEL");
        }
    }

    #[test]
    fn env_overrides_parse_numbers_and_ignore_garbage() {
        let _env = ENV_LOCK.lock().unwrap();
        // SAFETY: serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("VISDRIVE_DURATION_SECS", "15");
            std::env::set_var("VISDRIVE_DUTY_CYCLE", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.session.duration_secs, 15);
        assert_eq!(cfg.session.duty_cycle, 75);
        unsafe {
            std::env::remove_var("VISDRIVE_DURATION_SECS");
            std::env::remove_var("VISDRIVE_DUTY_CYCLE");
        }
    }

    #[test]
    fn api_key_prefers_visdrive_var_over_openai() {
        let _env = ENV_LOCK.lock().unwrap();
        // SAFETY: serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-openai");
            std::env::remove_var("VISDRIVE_API_KEY");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.oracle.api_key, "sk-openai");

        unsafe { std::env::set_var("VISDRIVE_API_KEY", "sk-visdrive") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.oracle.api_key, "sk-visdrive");
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
            std::env::remove_var("VISDRIVE_API_KEY");
        }
    }
}
