//! Configuration source (§6.1): layered loading, per-namespace access, and
//! re-registration of each namespace as a `Config.{namespace}` scalar so
//! modules can `registry.resolve_scalar::<serde_json::Value>("Config.cache")`
//! without depending on this crate's types.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::home_dir::resolve_home_dir;

/// Named failure modes of this crate's own config handling, kept distinct
/// from the `anyhow::Error` figment/IO wraps `load_layered` composes at its
/// boundary. Matches the `HomeDirError` split in `paths/home_dir.rs`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("namespace '{namespace}' does not match the requested shape: {source}")]
    NamespaceShapeMismatch {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),
}

/// Root configuration document: a typed `server` section plus a flexible
/// per-namespace bag. Namespaces are arbitrary: modules reach theirs via
/// [`AppConfig::get_namespace`] or the typed [`AppConfig::get_config`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: Option<LoggingConfig>,
    /// Selects which named profile section overlays the base, per §6.1's
    /// "the framework resolves `env`" rule. Defaults to `"default"`.
    #[serde(default = "default_env")]
    pub env: String,
    /// Per-namespace configuration bag: namespace → arbitrary JSON/YAML
    /// value. Re-registered individually as `Config.{namespace}` scalars.
    #[serde(default)]
    pub namespaces: HashMap<String, serde_json::Value>,
    /// Named profile overlays selected by `env`: `profiles.{env}` is merged
    /// over the base/file layers before the environment-variable layer, so
    /// e.g. `profiles.staging.server.port` only applies when `env: staging`.
    #[serde(default)]
    pub profiles: HashMap<String, serde_json::Value>,
}

fn default_env() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub home_dir: String, // normalized to an absolute path on load
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub timeout_sec: u64,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    pub file: String,          // "logs/api.log"
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8087,
            timeout_sec: 0,
        }
    }
}

pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/hyperspot.log".to_string(),
            file_level: "debug".to_string(),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: Some(default_logging_config()),
            env: default_env(),
            namespaces: HashMap::new(),
            profiles: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Layered load: defaults → YAML file → `env`-selected profile overlay
    /// → environment variables. `APP__SERVER__PORT=8087` maps to
    /// `server.port`. Also normalizes `server.home_dir` into an absolute
    /// path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        if !config_path.as_ref().exists() {
            return Err(ConfigError::FileNotFound(config_path.as_ref().to_path_buf()).into());
        }

        let base = AppConfig {
            server: ServerConfig::default(),
            logging: None,
            env: default_env(),
            namespaces: HashMap::new(),
            profiles: HashMap::new(),
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()));

        let env_name: String = figment
            .extract_inner("env")
            .unwrap_or_else(|_| default_env());
        let profile: Option<serde_json::Value> = figment
            .extract_inner::<HashMap<String, serde_json::Value>>("profiles")
            .ok()
            .and_then(|profiles| profiles.get(&env_name).cloned());
        if let Some(profile) = profile {
            figment = figment.merge(Serialized::defaults(profile));
        }

        figment = figment.merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| "failed to extract config from figment".to_string())?;

        normalize_home_dir_inplace(&mut config.server)
            .context("failed to resolve server.home_dir")?;

        Ok(config)
    }

    /// Registers the resolved `env` (§6.1: "the framework resolves `env`
    /// ... to select which of many providers contribute") as the Registry
    /// scalar `"env"`, the way [`Self::register_namespaces`] re-registers
    /// `Config.{namespace}` scalars.
    pub fn register_env(&self, registry: &modkit::Registry) -> anyhow::Result<()> {
        registry.register_scalar("env", self.env.clone(), modkit::RegisterOptions::new())?;
        Ok(())
    }

    /// Load from file, or fall back to defaults with a normalized home_dir.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("failed to resolve server.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize config to YAML")
    }

    /// `get_namespace(name) -> map<string, any>` from §6.1. Returns an
    /// empty object for a namespace nobody configured, rather than an error:
    /// modules should be able to assume their namespace always resolves to
    /// *something*.
    pub fn get_namespace(&self, name: &str) -> serde_json::Value {
        self.namespaces
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Typed counterpart of [`Self::get_namespace`]: `get_config(class_key)
    /// -> struct` from §6.1.
    pub fn get_config<T: for<'de> Deserialize<'de>>(&self, namespace: &str) -> Result<T> {
        let raw = self.get_namespace(namespace);
        serde_json::from_value(raw)
            .map_err(|source| {
                ConfigError::NamespaceShapeMismatch {
                    namespace: namespace.to_string(),
                    source,
                }
                .into()
            })
    }

    /// Re-registers every configured namespace as a `Config.{namespace}`
    /// scalar on `registry`, per §6.1's last sentence.
    pub fn register_namespaces(&self, registry: &modkit::Registry) -> anyhow::Result<()> {
        for (namespace, value) in &self.namespaces {
            registry.register_scalar(
                format!("Config.{namespace}"),
                value.clone(),
                modkit::RegisterOptions::new(),
            )?;
        }
        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

const fn default_subdir() -> &'static str {
    ".hyperspot"
}

fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let opt = if server.home_dir.trim().is_empty() {
        None
    } else {
        Some(server.home_dir.clone())
    };

    let resolved: PathBuf = resolve_home_dir(opt, default_subdir(), /*create*/ true)
        .context("home_dir normalization failed")?;

    server.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}
