use chrono::SecondsFormat;
use macaddr::MacAddr6;
use serde::Serialize;

use crate::switchbot::Reading;

/// Transport form of a [`Reading`], shared by every sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub mac: String,
    pub model: String,
    pub mode: String,
    pub date: String,
    pub temp: f32,
    pub humidity: u8,
}

impl Record {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<&Reading> for Record {
    fn from(reading: &Reading) -> Self {
        Self {
            mac: format_mac(&reading.mac),
            model: reading.model.as_str().to_owned(),
            mode: reading.mode.as_str().to_owned(),
            date: reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, false),
            temp: reading.temperature_celsius,
            humidity: reading.humidity_percent,
        }
    }
}

/// Lower-case, colon separated.
pub fn format_mac(mac: &MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
