use std::{fmt, str::FromStr};

use anyhow::{bail, Context, Result};

use crate::condition::Thresholds;

// ---------------------------------------------------------------------------
// BrokerAddress
// ---------------------------------------------------------------------------

/// MQTT broker endpoint parsed from `BROKER_URL`.
///
/// Accepted forms: `mqtt://` / `tcp://` (plain, default port 1883),
/// `mqtts://` / `ssl://` (TLS, default port 8883), and `host[:port]`
/// without a scheme (plain). Any other scheme is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl FromStr for BrokerAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (tls, rest) = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (false, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => bail!("unsupported broker scheme {scheme:?} in {s:?}"),
            None => (false, trimmed),
        };
        let rest = rest.trim_end_matches('/');

        if rest.is_empty() {
            bail!("broker address is empty");
        }

        let default_port = if tls { 8883 } else { 1883 };
        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .with_context(|| format!("invalid broker port in {s:?}"))?;
                Ok(Self { host: host.to_owned(), port, tls })
            }
            None => Ok(Self { host: rest.to_owned(), port: default_port, tls }),
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerAddress,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// `{MQTT_CLIENTID}_{unix_millis}`, fixed for the process lifetime.
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Prefix shared by every topic the bridge touches.
    pub topic_root: String,
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub thresholds: Thresholds,
    pub fcm_project_id: Option<String>,
    pub fcm_access_token: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub auto_control: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let client_prefix = optional("MQTT_CLIENTID", "greenhouse_bridge");
        let dry = optional("DRY_THRESHOLD", "1200")
            .parse()
            .context("DRY_THRESHOLD must be a number")?;
        let wet = optional("WET_THRESHOLD", "1800")
            .parse()
            .context("WET_THRESHOLD must be a number")?;

        Ok(Self {
            broker: required("BROKER_URL")?
                .parse()
                .context("BROKER_URL must be host[:port] or mqtt://host[:port]")?,
            mqtt_username: maybe("MQTT_USERNAME"),
            mqtt_password: maybe("MQTT_PASSWORD"),
            client_id: format!("{client_prefix}_{}", chrono::Utc::now().timestamp_millis()),
            keep_alive_secs: optional("MQTT_KEEP_ALIVE_SECS", "30")
                .parse()
                .context("MQTT_KEEP_ALIVE_SECS must be a positive integer")?,
            topic_root: optional("TOPIC_ROOT", "greenhouse"),
            database_url: maybe("DATABASE_URL"),
            thresholds: Thresholds::new(dry, wet)?,
            fcm_project_id: maybe("FCM_PROJECT_ID"),
            fcm_access_token: maybe("FCM_ACCESS_TOKEN"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            auto_control: parse_flag(&optional("AUTO_CONTROL", "true"))
                .context("AUTO_CONTROL must be true or false")?,
        })
    }
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Self {
            broker: BrokerAddress { host: "localhost".into(), port: 1883, tls: false },
            mqtt_username: None,
            mqtt_password: None,
            client_id: "bridge_test_1".into(),
            keep_alive_secs: 30,
            topic_root: "greenhouse".into(),
            database_url: None,
            thresholds: Thresholds::default(),
            fcm_project_id: None,
            fcm_access_token: None,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            auto_control: true,
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Unset and empty variables both read as `None`.
fn maybe(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
