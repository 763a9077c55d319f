//! Service Configuration
//!
//! Built once in `main` and handed to each component by reference.
//! Precedence, lowest first: defaults, the TOML file named by `--config` or
//! `POPFRAME_CONFIG`, then individual environment overrides:
//!
//! | Variable | Field |
//! |---|---|
//! | `URBAN_API` | `gateway.urban_api_url` |
//! | `TRANSPORTFRAME_API` | `gateway.transport_api_url` |
//! | `POPFRAME_GRAPH_TYPE` | `gateway.graph_type` |
//! | `POPFRAME_MAX_TRANSIENT_RETRIES` | `gateway.retry.max_transient_retries` |
//! | `POPFRAME_MODEL_CACHE` | `cache.root` |
//! | `GEOSERVER_WORKSPACE` | `orchestrator.workspace` |
//! | `POPFRAME_RECONCILE_ON_STARTUP` | `orchestrator.reconcile_on_startup` |
//! | `POPFRAME_BIND` | `server.host` |
//! | `PORT` | `server.port` |
//! | `POPFRAME_CORS_ORIGINS` | `server.cors_origins` (comma-separated) |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use popframe_core::{
    CacheConfig, ConfigError, GatewayConfig, OrchestratorConfig, PopframeError, PopframeResult,
};
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "POPFRAME_CONFIG";

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub server: ServerConfig,
}

impl ServiceConfig {
    /// Load from the optional config file and the process environment, then
    /// validate.
    pub fn load() -> PopframeResult<Self> {
        let mut config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> PopframeResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents).map_err(|reason| {
            PopframeError::Config(ConfigError::Malformed {
                path: path.display().to_string(),
                reason,
            })
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> PopframeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("URBAN_API") {
            self.gateway.urban_api_url = url;
        }
        if let Some(url) = lookup("TRANSPORTFRAME_API") {
            self.gateway.transport_api_url = url;
        }
        if let Some(value) = lookup("POPFRAME_GRAPH_TYPE") {
            self.gateway.graph_type = value
                .parse()
                .map_err(|reason: String| invalid("POPFRAME_GRAPH_TYPE", &value, &reason))?;
        }
        if let Some(value) = lookup("POPFRAME_MAX_TRANSIENT_RETRIES") {
            self.gateway.retry.max_transient_retries =
                Some(parse_env("POPFRAME_MAX_TRANSIENT_RETRIES", &value)?);
        }
        if let Some(root) = lookup("POPFRAME_MODEL_CACHE") {
            self.cache = CacheConfig::new(root);
        }
        if let Some(workspace) = lookup("GEOSERVER_WORKSPACE") {
            self.orchestrator.workspace = workspace;
        }
        if let Some(value) = lookup("POPFRAME_RECONCILE_ON_STARTUP") {
            self.orchestrator.reconcile_on_startup = match value.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(invalid(
                        "POPFRAME_RECONCILE_ON_STARTUP",
                        &value,
                        "expected true, false, 1 or 0",
                    ))
                }
            };
        }
        if let Some(host) = lookup("POPFRAME_BIND") {
            self.server.host = host;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("POPFRAME_CORS_ORIGINS") {
            self.server.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> PopframeResult<()> {
        self.gateway.validate()?;
        self.cache.validate()?;
        self.orchestrator.validate()?;
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> PopframeResult<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| invalid("server.host", &addr, &e.to_string()))
    }
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn parse_env<T>(field: &str, value: &str) -> PopframeResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, value, &e.to_string()))
}

fn invalid(field: &str, value: &str, reason: &str) -> PopframeError {
    PopframeError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use popframe_core::{GraphType, RegionId};
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.orchestrator.excluded_regions, vec![RegionId::new(3268), RegionId::new(3138)]);
        assert_eq!(config.bind_addr().expect("addr").to_string(), "0.0.0.0:8000");
        // upstream URLs have no default
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections_override_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [gateway]
            urban_api_url = "http://urban.local"
            transport_api_url = "http://transport.local"
            graph_type = "walk"

            [gateway.retry]
            max_transient_retries = 3

            [orchestrator]
            excluded_regions = [1, 2]

            [server]
            port = 9100
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.gateway.graph_type, GraphType::Walk);
        assert_eq!(config.gateway.retry.max_transient_retries, Some(3));
        assert_eq!(config.gateway.population_batch_size, 15);
        assert_eq!(config.orchestrator.excluded_regions, vec![RegionId::new(1), RegionId::new(2)]);
        assert_eq!(config.orchestrator.layer_name, "popframe");
        assert_eq!(config.server.port, 9100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(ServiceConfig::from_toml("[server]\nportt = 1\n").is_err());
        assert!(ServiceConfig::from_toml("[geoserver]\nurl = \"x\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(env(&[
                ("URBAN_API", "http://urban.local"),
                ("TRANSPORTFRAME_API", "https://transport.local"),
                ("POPFRAME_MODEL_CACHE", "/var/cache/popframe"),
                ("GEOSERVER_WORKSPACE", "popframe-test"),
                ("POPFRAME_BIND", "127.0.0.1"),
                ("PORT", "8080"),
                ("POPFRAME_CORS_ORIGINS", "https://a.example, ,https://b.example"),
                ("POPFRAME_GRAPH_TYPE", "intermodal"),
                ("POPFRAME_MAX_TRANSIENT_RETRIES", "5"),
                ("POPFRAME_RECONCILE_ON_STARTUP", "false"),
            ]))
            .expect("overrides");

        assert_eq!(config.gateway.urban_api_url, "http://urban.local");
        assert_eq!(config.gateway.transport_api_url, "https://transport.local");
        assert_eq!(config.cache.root, PathBuf::from("/var/cache/popframe"));
        assert_eq!(config.orchestrator.workspace, "popframe-test");
        assert_eq!(config.server.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.gateway.graph_type, GraphType::Intermodal);
        assert_eq!(config.gateway.retry.max_transient_retries, Some(5));
        assert!(!config.orchestrator.reconcile_on_startup);
        assert_eq!(config.bind_addr().expect("addr").to_string(), "127.0.0.1:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = ServiceConfig::default();
        let err = config.apply_overrides(env(&[("PORT", "eighty")])).expect_err("bad port");
        assert!(matches!(
            err,
            PopframeError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "PORT"
        ));

        let err = config
            .apply_overrides(env(&[("POPFRAME_GRAPH_TYPE", "bicycle")]))
            .expect_err("bad graph type");
        assert_eq!(err.status_code(), 500);

        assert!(config
            .apply_overrides(env(&[("POPFRAME_RECONCILE_ON_STARTUP", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_bad_bind_host() {
        let mut config = ServiceConfig::default();
        config.server.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[cache]\nroot = \"/tmp/popframe-cache\"").expect("write");
        let config = ServiceConfig::from_path(file.path()).expect("load");
        assert_eq!(config.cache.root, PathBuf::from("/tmp/popframe-cache"));

        let err = ServiceConfig::from_path(Path::new("/definitely/missing.toml")).expect_err("missing");
        assert!(matches!(err, PopframeError::Config(ConfigError::Unreadable { .. })));

        let mut broken = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(broken, "[cache").expect("write");
        let err = ServiceConfig::from_path(broken.path()).expect_err("malformed");
        assert!(matches!(err, PopframeError::Config(ConfigError::Malformed { .. })));
    }
}
