//! Transmit configuration

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::DEFAULT_SYNC_CHANNEL;

/// Configuration consumed by [`crate::Transmit`]
///
/// ```yaml
/// ping_interval: 30s      # or 30000, or false
/// transport:
///   channel: transmit::broadcast
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransmitConfig {
    /// Heartbeat interval; `None` disables pings
    #[serde(
        default,
        deserialize_with = "deserialize_ping_interval",
        serialize_with = "serialize_ping_interval"
    )]
    pub ping_interval: Option<Duration>,

    /// Bus settings, only used when a bus is supplied
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bus channel carrying sync messages
    #[serde(default = "default_sync_channel")]
    pub channel: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel: default_sync_channel(),
        }
    }
}

fn default_sync_channel() -> String {
    DEFAULT_SYNC_CHANNEL.to_string()
}

/// Parse a ping interval given as milliseconds (`"30000"`), a duration
/// string (`"30s"`, `"1m 30s"`) or a disabling flag (`"false"`, `"off"`, `""`).
///
/// A zero interval disables pings.
pub fn parse_ping_interval(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if value.is_empty()
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("off")
    {
        return Ok(None);
    }
    let duration = match value.parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => value
            .parse::<humantime::Duration>()
            .map_err(|e| Error::Config(format!("invalid ping interval `{value}`: {e}")))?
            .into(),
    };
    Ok((!duration.is_zero()).then_some(duration))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Millis(u64),
    Flag(bool),
    Text(String),
}

fn deserialize_ping_interval<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawInterval>::deserialize(deserializer)?;
    match raw {
        None | Some(RawInterval::Flag(false)) => Ok(None),
        Some(RawInterval::Flag(true)) => Err(serde::de::Error::custom(
            "ping_interval must be a duration, not `true`",
        )),
        Some(RawInterval::Millis(millis)) => {
            Ok((millis > 0).then(|| Duration::from_millis(millis)))
        }
        Some(RawInterval::Text(text)) => {
            parse_ping_interval(&text).map_err(serde::de::Error::custom)
        }
    }
}

fn serialize_ping_interval<S>(
    value: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
        None => serializer.serialize_bool(false),
    }
}
