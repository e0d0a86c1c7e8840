//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Secrets (Twilio credentials, database URL) may come from the environment instead of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider channel settings (WhatsApp via Twilio).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Live connection tuning.
    #[serde(default)]
    pub live: LiveConfig,

    /// Development mode. The only switch that skips webhook signature validation; never set in production.
    #[serde(default)]
    pub debug: bool,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: agent tokens or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = anonymous access (only safe when bind is loopback). "token" = every REST and live request carries an agent token.
    #[serde(default)]
    pub mode: GatewayAuthMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require an agent bearer token.
    Token,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

/// WhatsApp (Twilio) channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppChannelConfig {
    /// Twilio account SID. Overridden by TWILIO_ACCOUNT_SID env when set.
    pub account_sid: Option<String>,
    /// Twilio auth token; signs outbound API calls and keys webhook signature validation. Overridden by TWILIO_AUTH_TOKEN env when set.
    pub auth_token: Option<String>,
    /// Sender number registered for WhatsApp, without the `whatsapp:` prefix. Overridden by TWILIO_WHATSAPP_NUMBER env when set.
    pub from_number: Option<String>,
    /// Override for the Twilio REST API base (tests, regional edges).
    pub api_base: Option<String>,
    /// Public base URL the provider calls (e.g. "https://support.example.com"). Used to rebuild the signed URL behind proxies.
    pub webhook_base_url: Option<String>,
}

/// Database config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// sqlx SQLite URL. Overridden by DATABASE_URL env when set.
    pub url: Option<String>,
}

/// Live connection config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Per-connection mailbox size; a full mailbox drops broadcasts for that connection only.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_mailbox_capacity() -> usize {
    64
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

/// Trimmed, non-empty env var value.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolved Twilio credentials and numbers (env over config).
#[derive(Debug, Clone, Default)]
pub struct WhatsAppCredentials {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
}

/// Resolve Twilio settings: TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_WHATSAPP_NUMBER override config.
pub fn resolve_whatsapp_credentials(config: &Config) -> WhatsAppCredentials {
    let wa = &config.channels.whatsapp;
    WhatsAppCredentials {
        account_sid: env_value("TWILIO_ACCOUNT_SID").or_else(|| non_empty(wa.account_sid.as_ref())),
        auth_token: env_value("TWILIO_AUTH_TOKEN").or_else(|| non_empty(wa.auth_token.as_ref())),
        from_number: env_value("TWILIO_WHATSAPP_NUMBER")
            .or_else(|| non_empty(wa.from_number.as_ref())),
    }
}

/// Resolve the database URL: env DATABASE_URL overrides config; default is `relay.db` next to the config file.
pub fn resolve_database_url(config: &Config, config_path: &Path) -> String {
    env_value("DATABASE_URL")
        .or_else(|| non_empty(config.database.url.as_ref()))
        .unwrap_or_else(|| {
            let db = config_dir(config_path).join("relay.db");
            format!("sqlite://{}?mode=rwc", db.to_string_lossy().replace('\\', "/"))
        })
}

/// True when debug mode is on in config or via RELAY_DEBUG=1/true.
pub fn resolve_debug(config: &Config) -> bool {
    config.debug
        || env_value("RELAY_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Directory holding the config file (and the default database).
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Load config from the given path, or the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 15151);
        assert_eq!(g.bind, "127.0.0.1");
        assert_eq!(g.auth.mode, GatewayAuthMode::None);
    }

    #[test]
    fn parses_camel_case_sections() {
        let json = r#"{
            "gateway": { "port": 9000, "auth": { "mode": "token" } },
            "channels": { "whatsapp": { "accountSid": "AC1", "webhookBaseUrl": "https://x.test" } },
            "live": { "mailboxCapacity": 8 },
            "debug": true
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.gateway.auth.mode, GatewayAuthMode::Token);
        assert_eq!(config.channels.whatsapp.account_sid.as_deref(), Some("AC1"));
        assert_eq!(
            config.channels.whatsapp.webhook_base_url.as_deref(),
            Some("https://x.test")
        );
        assert_eq!(config.live.mailbox_capacity, 8);
        assert!(config.debug);
    }

    #[test]
    fn empty_object_is_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(!config.debug);
        assert_eq!(config.live.mailbox_capacity, 64);
        assert!(config.channels.whatsapp.auth_token.is_none());
    }

    #[test]
    fn database_url_from_config_wins_over_default() {
        let mut config = Config::default();
        config.database.url = Some("sqlite::memory:".to_string());
        if std::env::var("DATABASE_URL").is_err() {
            assert_eq!(
                resolve_database_url(&config, Path::new("/srv/relay/config.json")),
                "sqlite::memory:"
            );
        }
    }

    #[test]
    fn default_database_sits_next_to_config() {
        let config = Config::default();
        if std::env::var("DATABASE_URL").is_err() {
            assert_eq!(
                resolve_database_url(&config, Path::new("/srv/relay/config.json")),
                "sqlite:///srv/relay/relay.db?mode=rwc"
            );
        }
    }

    #[test]
    fn loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }
}
