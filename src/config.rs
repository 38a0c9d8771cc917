use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use ini::{Ini, Properties};
use rumqttc::MqttOptions;
use url::Url;

const API_SECTION: &str = "API";
const MQTT_SECTION: &str = "MQTT";

const DEFAULT_TOPIC: &str = "switchbot";
const DEFAULT_CLIENT_ID: &str = "switchbot-relay";
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Sink configuration, read once at startup.
///
/// A section that is absent disables its sink. A section that is present must
/// be complete; validation happens here so nothing fails halfway through a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub api: Option<ApiConfig>,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub data_endpoint: Url,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_ini(&ini).with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let ini = Ini::load_from_str(s).context("failed to parse config")?;

        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let api = ini
            .section(Some(API_SECTION))
            .map(ApiConfig::from_section)
            .transpose()
            .with_context(|| format!("invalid [{API_SECTION}] section"))?;

        let mqtt = ini
            .section(Some(MQTT_SECTION))
            .map(MqttConfig::from_section)
            .transpose()
            .with_context(|| format!("invalid [{MQTT_SECTION}] section"))?;

        Ok(Self { api, mqtt })
    }
}

impl ApiConfig {
    fn from_section(section: &Properties) -> Result<Self> {
        let raw_endpoint = required(section, "DATA_ENDPOINT")?;
        let data_endpoint = Url::parse(raw_endpoint)
            .with_context(|| format!("invalid DATA_ENDPOINT: {raw_endpoint}"))?;
        if !matches!(data_endpoint.scheme(), "http" | "https") {
            bail!("DATA_ENDPOINT must be an http or https URL: {raw_endpoint}");
        }

        let api_key = optional(section, "API_KEY").map(str::to_owned);

        Ok(Self {
            data_endpoint,
            api_key,
        })
    }
}

impl MqttConfig {
    fn from_section(section: &Properties) -> Result<Self> {
        let server = required(section, "SERVER")?.to_owned();

        let raw_port = required(section, "PORT")?;
        let port = raw_port
            .parse()
            .with_context(|| format!("invalid PORT: {raw_port}"))?;

        let topic = optional(section, "TOPIC")
            .unwrap_or(DEFAULT_TOPIC)
            .to_owned();
        let client_id = optional(section, "CLIENT_ID")
            .unwrap_or(DEFAULT_CLIENT_ID)
            .to_owned();

        let keep_alive = match optional(section, "KEEP_ALIVE") {
            Some(raw) => {
                let seconds: u64 = raw
                    .parse()
                    .with_context(|| format!("invalid KEEP_ALIVE: {raw}"))?;
                if seconds == 0 {
                    bail!("KEEP_ALIVE must be at least 1 second");
                }
                Duration::from_secs(seconds)
            }
            None => DEFAULT_KEEP_ALIVE,
        };

        Ok(Self {
            server,
            port,
            topic,
            client_id,
            keep_alive,
        })
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(self.client_id.as_str(), self.server.as_str(), self.port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options
    }
}

fn required<'a>(section: &'a Properties, key: &str) -> Result<&'a str> {
    let Some(value) = optional(section, key) else {
        bail!("{key} is not set");
    };

    Ok(value)
}

/// Blank values count as unset.
fn optional<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
