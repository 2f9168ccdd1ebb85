use serde::{Deserialize, Serialize};
use std::path::Path;
use transmit::{parse_ping_interval, TransmitConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub transmit: TransmitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// Expose `/__transmit/stats`
    #[serde(default)]
    pub enable_admin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_id: default_instance_id(),
            enable_admin: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    /// Redis URL, e.g., "redis://localhost:6379" or "redis://:password@host:6379"
    /// Without it the server runs as a single instance
    #[serde(default)]
    pub url: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn env_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config: Self = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        // Environment overrides the file
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT `{port}`: {e}"))?;
        }
        if let Ok(id) = std::env::var("INSTANCE_ID") {
            if !id.is_empty() {
                config.server.instance_id = id;
            }
        }
        if let Ok(value) = std::env::var("ENABLE_ADMIN") {
            config.server.enable_admin = env_flag(&value);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = (!url.is_empty()).then_some(url);
        }
        if let Ok(interval) = std::env::var("TRANSMIT_PING_INTERVAL") {
            config.transmit.ping_interval = parse_ping_interval(&interval)?;
        }
        if let Ok(channel) = std::env::var("TRANSMIT_SYNC_CHANNEL") {
            config.transmit.transport.channel = channel;
        }

        if config.transmit.transport.channel.is_empty() {
            anyhow::bail!("TRANSMIT_SYNC_CHANNEL must not be empty");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_yaml_with_defaults() {
        let yaml = r#"
server:
  port: 9000
transmit:
  ping_interval: 30s
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(!config.server.enable_admin);
        assert!(!config.server.instance_id.is_empty());
        assert!(config.redis.url.is_none());
        assert_eq!(config.transmit.ping_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.transmit.transport.channel, "transmit::broadcast");
    }

    #[test]
    fn empty_document_is_default() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.transmit.ping_interval, None);
    }

    #[test]
    fn admin_flag_values() {
        assert!(env_flag("1"));
        assert!(env_flag("true"));
        assert!(!env_flag("0"));
        assert!(!env_flag("FALSE"));
    }
}
