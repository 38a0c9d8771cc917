use chrono::DateTime;
use chrono_tz::Tz;
use macaddr::MacAddr6;

use crate::switchbot::{DeviceType, Mode};

#[derive(Debug, Clone)]
pub struct Reading {
    pub mac: MacAddr6,

    pub model: DeviceType,

    pub mode: Mode,

    pub timestamp: DateTime<Tz>,

    pub temperature_celsius: f32,

    pub humidity_percent: u8,
}
