use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::BootstrapOptions;

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
const MAX_SCRIPT_BUDGET_MS: u64 = 60_000;
const MAX_RECURSION_LIMIT: usize = 16_384;
const MAX_STACK_SIZE_LIMIT: usize = 64 * 1024 * 1024;
const MAX_YIELD_BUDGET: u32 = 1_000_000;
/// Hard ceiling on the dense feature bitmap (2 MiB of bits).
pub const MAX_FEATURE_INDEX_LIMIT: u32 = dyn_codec::MAX_POSITION;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config {path} exceeds {limit} bytes")]
    TooLarge { path: PathBuf, limit: u64 },
    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid TOML config")]
    Toml(#[from] toml::de::Error),
    #[error("invalid YAML config")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub sandbox: Option<SandboxConfig>,
    pub session: Option<SessionConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    pub script_budget_ms: Option<u64>,
    pub recursion_limit: Option<usize>,
    pub stack_size_limit: Option<usize>,
    pub loop_iteration_limit: Option<u64>,
    pub yield_budget: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub revision: Option<u64>,
    pub auth_token_param: Option<String>,
    pub max_feature_index: Option<u32>,
    pub cookie_domain: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl Config {
    /// Reads TOML or YAML by extension. Other extensions try TOML first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut data = String::new();
        File::open(path)
            .map_err(io_error)?
            .take(MAX_CONFIG_BYTES + 1)
            .read_to_string(&mut data)
            .map_err(io_error)?;
        if data.len() as u64 > MAX_CONFIG_BYTES {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                limit: MAX_CONFIG_BYTES,
            });
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&data)?),
            Some("yaml" | "yml") => Ok(serde_yaml::from_str(&data)?),
            _ => match toml::from_str(&data) {
                Ok(cfg) => Ok(cfg),
                Err(err) => {
                    debug!(error = %err, "config is not TOML, trying YAML");
                    Ok(serde_yaml::from_str(&data)?)
                }
            },
        }
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|logging| logging.level.as_deref())
    }

    pub fn apply(&self, opts: &mut BootstrapOptions) {
        if let Some(sandbox) = &self.sandbox {
            apply_sandbox(sandbox, opts);
        }
        if let Some(session) = &self.session {
            apply_session(session, opts);
        }
    }
}

fn apply_sandbox(cfg: &SandboxConfig, opts: &mut BootstrapOptions) {
    if let Some(v) = cfg.script_budget_ms {
        if v == 0 || v > MAX_SCRIPT_BUDGET_MS {
            warn!(value = v, limit = MAX_SCRIPT_BUDGET_MS, "Invalid script_budget_ms in config");
        } else {
            info!(value = v, "Config override script_budget_ms");
            opts.sandbox.script_budget = Duration::from_millis(v);
        }
    }
    if let Some(v) = cfg.recursion_limit {
        if v == 0 || v > MAX_RECURSION_LIMIT {
            warn!(value = v, limit = MAX_RECURSION_LIMIT, "Invalid recursion_limit in config");
        } else {
            opts.sandbox.recursion_limit = v;
        }
    }
    if let Some(v) = cfg.stack_size_limit {
        if v == 0 || v > MAX_STACK_SIZE_LIMIT {
            warn!(value = v, limit = MAX_STACK_SIZE_LIMIT, "Invalid stack_size_limit in config");
        } else {
            opts.sandbox.stack_size_limit = v;
        }
    }
    if let Some(v) = cfg.loop_iteration_limit {
        if v == 0 {
            warn!(value = v, "Invalid loop_iteration_limit in config");
        } else {
            opts.sandbox.loop_iteration_limit = Some(v);
        }
    }
    if let Some(v) = cfg.yield_budget {
        if v == 0 || v > MAX_YIELD_BUDGET {
            warn!(value = v, limit = MAX_YIELD_BUDGET, "Invalid yield_budget in config");
        } else {
            opts.sandbox.yield_budget = v;
        }
    }
}

fn apply_session(cfg: &SessionConfig, opts: &mut BootstrapOptions) {
    if let Some(v) = cfg.revision {
        if v == 0 {
            warn!(value = v, "Invalid revision in config");
        } else {
            info!(value = v, "Config override revision");
            opts.revision = v;
        }
    }
    if let Some(v) = &cfg.auth_token_param {
        if v.trim().is_empty() {
            warn!("Invalid auth_token_param in config (empty)");
        } else {
            opts.auth_token_param = v.clone();
        }
    }
    if let Some(v) = cfg.max_feature_index {
        if v > MAX_FEATURE_INDEX_LIMIT {
            warn!(value = v, limit = MAX_FEATURE_INDEX_LIMIT, "Invalid max_feature_index in config");
        } else {
            opts.max_feature_index = v;
        }
    }
    if let Some(v) = &cfg.cookie_domain {
        if v.trim().is_empty() {
            warn!("Invalid cookie_domain in config (empty)");
        } else {
            opts.cookie_domain = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn applies_valid_overrides() {
        let cfg: Config = toml::from_str(
            r#"
            [sandbox]
            script_budget_ms = 2500
            yield_budget = 64
            loop_iteration_limit = 1000000

            [session]
            revision = 4000000
            auth_token_param = "fb_dtsg_ag"
            max_feature_index = 4096

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        let mut opts = BootstrapOptions::default();
        cfg.apply(&mut opts);
        assert_eq!(opts.sandbox.script_budget, Duration::from_millis(2500));
        assert_eq!(opts.sandbox.yield_budget, 64);
        assert_eq!(opts.sandbox.loop_iteration_limit, Some(1_000_000));
        assert_eq!(opts.revision, 4_000_000);
        assert_eq!(opts.auth_token_param, "fb_dtsg_ag");
        assert_eq!(opts.max_feature_index, 4096);
        assert_eq!(cfg.log_level(), Some("debug"));
    }

    #[test]
    fn ignores_out_of_range_values() {
        let cfg: Config = toml::from_str(
            r#"
            [sandbox]
            script_budget_ms = 0
            recursion_limit = 100000

            [session]
            auth_token_param = "  "
            max_feature_index = 4294967295
            "#,
        )
        .unwrap();
        let defaults = BootstrapOptions::default();
        let mut opts = BootstrapOptions::default();
        cfg.apply(&mut opts);
        assert_eq!(opts.sandbox.script_budget, defaults.sandbox.script_budget);
        assert_eq!(opts.sandbox.recursion_limit, defaults.sandbox.recursion_limit);
        assert_eq!(opts.auth_token_param, defaults.auth_token_param);
        assert_eq!(opts.max_feature_index, defaults.max_feature_index);
    }

    #[test]
    fn loads_yaml_by_extension_and_sniffs_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("session.yml");
        fs::write(&yaml, "session:\n  revision: 42\n").unwrap();
        let cfg = Config::load(&yaml).unwrap();
        assert_eq!(cfg.session.and_then(|s| s.revision), Some(42));

        let unknown = dir.path().join("session.conf");
        fs::write(&unknown, "logging:\n  level: info\n").unwrap();
        assert_eq!(Config::load(&unknown).unwrap().log_level(), Some("info"));
    }

    #[test]
    fn rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.toml");
        fs::write(&path, vec![b'#'; MAX_CONFIG_BYTES as usize + 1]).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::TooLarge { limit: MAX_CONFIG_BYTES, .. })
        ));
    }

    #[test]
    fn load_errors_name_the_problem() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = Config::load(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"), "{err}");

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[sandbox\n").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Toml(_))));

        let sniffed = dir.path().join("broken.conf");
        fs::write(&sniffed, "[sandbox\n").unwrap();
        assert!(matches!(Config::load(&sniffed), Err(ConfigError::Yaml(_))));
    }
}
