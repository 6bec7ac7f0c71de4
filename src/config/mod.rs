use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{ProctorError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Document API base URL; records go to files when unset
    pub api_url: Option<String>,
    pub collection: String,
    pub api_timeout_secs: u64,
    pub data_dir: String,
    pub backup_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            collection: "proctoringSessions".to_string(),
            api_timeout_secs: 30,
            data_dir: "./proctoring-data".to_string(),
            backup_dir: "./proctoring-backup".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let storage_defaults = StorageConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            storage: StorageConfig {
                api_url: env::var("STORAGE_API_URL").ok().filter(|url| !url.is_empty()),
                collection: env::var("STORAGE_COLLECTION")
                    .unwrap_or(storage_defaults.collection),
                api_timeout_secs: parse_var(
                    "STORAGE_API_TIMEOUT_SECS",
                    storage_defaults.api_timeout_secs,
                )?,
                data_dir: env::var("STORAGE_DATA_DIR").unwrap_or(storage_defaults.data_dir),
                backup_dir: env::var("BACKUP_DIR").unwrap_or(storage_defaults.backup_dir),
            },
            logging: LoggingConfig {
                format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default())?,
            },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        // Try to parse as IP address first
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            ProctorError::ConfigurationParseFailed(format!("{}={:?} is not valid", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(ProctorError::InvalidConfiguration(format!(
            "unknown LOG_FORMAT {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            storage: StorageConfig::default(),
            logging: LoggingConfig {
                format: LogFormat::Text,
            },
        }
    }

    #[test]
    fn test_parse_localhost() {
        assert_eq!(config_for("localhost", 8080).bind_address(), ([127, 0, 0, 1], 8080));
    }

    #[test]
    fn test_parse_ipv4_address() {
        assert_eq!(config_for("192.168.1.1", 3000).bind_address(), ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_all_interfaces() {
        assert_eq!(config_for("0.0.0.0", 8080).bind_address(), ([0, 0, 0, 0], 8080));
        assert_eq!(config_for("", 8080).bind_address(), ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        assert_eq!(
            config_for("invalid-hostname", 9000).bind_address(),
            ([0, 0, 0, 0], 9000)
        );
    }

    #[test]
    fn test_storage_defaults() {
        let storage = StorageConfig::default();
        assert!(storage.api_url.is_none());
        assert_eq!(storage.api_timeout_secs, 30);
        assert_eq!(storage.backup_dir, "./proctoring-backup");
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("").unwrap(), LogFormat::Text);
        assert_eq!(parse_log_format("JSON").unwrap(), LogFormat::Json);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_unparsable_variable_is_reported() {
        std::env::set_var("PROCTOR_TEST_TIMEOUT", "soon");
        let err = parse_var::<u64>("PROCTOR_TEST_TIMEOUT", 30).unwrap_err();
        assert!(matches!(err, ProctorError::ConfigurationParseFailed(_)));
        std::env::remove_var("PROCTOR_TEST_TIMEOUT");

        assert_eq!(parse_var::<u64>("PROCTOR_TEST_TIMEOUT", 30).unwrap(), 30);
    }
}
