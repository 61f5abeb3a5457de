//! Configuration Vault – reads/writes `~/.carbrain/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carbrain_kernel::AnomalyThresholds;
use carbrain_runtime::{EngineConfig, HistoryCapacities, LlmPolicyConfig};
use carbrain_types::CarError;
use serde::{Deserialize, Serialize};

/// Persisted operator configuration stored in `~/.carbrain/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible provider.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Provider API key.  Empty means no provider: the engine runs in DEMO
    /// mode on the heuristic policy.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on one provider call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Command-log entries echoed into each prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Keep image data URLs in the exchange log (memory heavy).
    #[serde(default)]
    pub retain_image_payload: bool,

    /// Directory for saved camera frames; frames are not saved when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<PathBuf>,

    #[serde(default = "default_image_capacity")]
    pub image_capacity: usize,

    #[serde(default)]
    pub capacities: HistoryCapacities,

    #[serde(default)]
    pub anomaly: AnomalyThresholds,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("model", &self.model)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("history_window", &self.history_window)
            .field("retain_image_payload", &self.retain_image_payload)
            .field("image_dir", &self.image_dir)
            .field("image_capacity", &self.image_capacity)
            .field("capacities", &self.capacities)
            .field("anomaly", &self.anomaly)
            .finish()
    }
}

fn default_api_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-exp:free".to_string()
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_max_tokens() -> u32 {
    100
}
fn default_temperature() -> f64 {
    0.3
}
fn default_history_window() -> usize {
    5
}
fn default_image_capacity() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            model: default_model(),
            request_timeout_ms: default_request_timeout_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            history_window: default_history_window(),
            retain_image_payload: false,
            image_dir: None,
            image_capacity: default_image_capacity(),
            capacities: HistoryCapacities::default(),
            anomaly: AnomalyThresholds::default(),
        }
    }
}

impl Config {
    pub fn has_provider(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// The decision-engine view of this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            llm: LlmPolicyConfig {
                model: self.model.clone(),
                request_timeout: Duration::from_millis(self.request_timeout_ms.max(1)),
                max_tokens: self.max_tokens,
                temperature: self.temperature as f32,
                retain_image_payload: self.retain_image_payload,
            },
            capacities: self.capacities,
            history_window: self.history_window,
            anomaly: self.anomaly,
            image_capacity: self.image_capacity,
        }
    }
}

/// Return the path to `~/.carbrain/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".carbrain").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, CarError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config stored at `path`, exactly as written.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, CarError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        CarError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| CarError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `OPENAI_API_KEY`, else `OPENROUTER_API_KEY` | `api_key` |
/// | `OPENAI_BASE_URL` | `api_base_url` |
/// | `OPENAI_MODEL` | `model` |
/// | `CARBRAIN_TIMEOUT_MS` | `request_timeout_ms` |
/// | `CARBRAIN_IMAGE_DIR` | `image_dir` |
///
/// Unparseable numeric values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("OPENAI_API_KEY").or_else(|| non_empty("OPENROUTER_API_KEY")) {
        cfg.api_key = key;
    }
    if let Some(v) = non_empty("OPENAI_BASE_URL") {
        cfg.api_base_url = v;
    }
    if let Some(v) = non_empty("OPENAI_MODEL") {
        cfg.model = v;
    }
    if let Some(v) = non_empty("CARBRAIN_TIMEOUT_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.request_timeout_ms = ms;
    }
    if let Some(v) = non_empty("CARBRAIN_IMAGE_DIR") {
        cfg.image_dir = Some(PathBuf::from(v));
    }
}

/// Save the config to disk, creating `~/.carbrain/` if necessary.
pub fn save(cfg: &Config) -> Result<(), CarError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), CarError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CarError::Config(format!("failed to create config directory: {e}")))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                CarError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CarError::Serialization(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| CarError::Config(format!("failed to write {}: {e}", path.display()));
    // The file may hold an API key: owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[test]
    fn debug_redacts_api_key() {
        let cfg = Config {
            api_key: "sk-or-super-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("sk-or-super-secret"));
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_every_section() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.api_key = "key".to_string();
        cfg.image_dir = Some(PathBuf::from("/var/lib/carbrain/images"));
        cfg.capacities.alerts = 50;
        cfg.anomaly.gyro_max = 3.5;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.api_key, "key");
        assert_eq!(loaded.model, "google/gemini-2.0-flash-exp:free");
        assert_eq!(loaded.request_timeout_ms, 5000);
        assert_eq!(loaded.capacities.alerts, 50);
        assert_eq!(loaded.capacities.commands, 1000);
        assert_eq!(loaded.anomaly.gyro_max, 3.5);
        assert_eq!(loaded.image_dir, cfg.image_dir);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = \"openai/gpt-4o\"\n[anomaly]\naz_min = 4.0\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.model, "openai/gpt-4o");
        assert_eq!(loaded.api_base_url, "https://openrouter.ai/api/v1");
        assert_eq!(loaded.anomaly.az_min, 4.0);
        assert_eq!(loaded.anomaly.ax_max, 7.0);
        assert!(!loaded.has_provider());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_tokens = \"lots\"").unwrap();
        assert!(matches!(load_from(&path), Err(CarError::Config(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_carbrain_dir() {
        let p = config_path_for_home("/home/driver");
        assert_eq!(p, PathBuf::from("/home/driver/.carbrain/config.toml"));
    }

    #[test]
    fn engine_config_carries_request_parameters() {
        let cfg = Config {
            model: "anthropic/claude-3-haiku".to_string(),
            request_timeout_ms: 2500,
            history_window: 3,
            ..Config::default()
        };
        let engine = cfg.engine_config();
        assert_eq!(engine.llm.model, "anthropic/claude-3-haiku");
        assert_eq!(engine.llm.request_timeout, Duration::from_millis(2500));
        assert_eq!(engine.llm.max_tokens, 100);
        assert!((engine.llm.temperature - 0.3).abs() < 1e-6);
        assert_eq!(engine.history_window, 3);
        assert_eq!(engine.capacities.exchanges, 500);
    }

    // ── Environment overrides ───────────────────────────────────────────────

    const OVERRIDE_VARS: [&str; 6] = [
        "OPENAI_API_KEY",
        "OPENROUTER_API_KEY",
        "OPENAI_BASE_URL",
        "OPENAI_MODEL",
        "CARBRAIN_TIMEOUT_MS",
        "CARBRAIN_IMAGE_DIR",
    ];

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialise access to the override variables and start from a clean
    /// environment.
    fn lock_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        for name in OVERRIDE_VARS {
            // SAFETY: every test touching these variables holds ENV_LOCK.
            unsafe { std::env::remove_var(name) };
        }
        guard
    }

    fn set_env(name: &str, value: &str) {
        // SAFETY: callers hold ENV_LOCK.
        unsafe { std::env::set_var(name, value) };
    }

    #[test]
    fn apply_env_overrides_changes_model_and_base_url() {
        let _env = lock_env();
        set_env("OPENAI_MODEL", "openai/gpt-4o-mini");
        set_env("OPENAI_BASE_URL", "http://localhost:11434/v1");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.model, "openai/gpt-4o-mini");
        assert_eq!(cfg.api_base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn apply_env_overrides_timeout_ignores_invalid_values() {
        let _env = lock_env();
        set_env("CARBRAIN_TIMEOUT_MS", "soon");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.request_timeout_ms, 5000);

        set_env("CARBRAIN_TIMEOUT_MS", "1500");
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.request_timeout_ms, 1500);
    }

    #[test]
    fn apply_env_overrides_sets_image_dir() {
        let _env = lock_env();
        set_env("CARBRAIN_IMAGE_DIR", "/tmp/frames");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.image_dir, Some(PathBuf::from("/tmp/frames")));
    }

    #[test]
    fn apply_env_overrides_prefers_openai_key_over_openrouter() {
        let _env = lock_env();
        set_env("OPENROUTER_API_KEY", "or-key");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api_key, "or-key");

        set_env("OPENAI_API_KEY", "oa-key");
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api_key, "oa-key");
        assert!(cfg.has_provider());
    }

    #[test]
    fn apply_env_overrides_without_variables_keeps_config() {
        let _env = lock_env();
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(format!("{cfg:?}"), format!("{:?}", Config::default()));
    }
}
