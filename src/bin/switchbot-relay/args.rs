use std::path::PathBuf;

use chrono_tz::Tz;
use clap::Parser;
use macaddr::MacAddr6;
use switchbot_relay::relay::{IterationMode, SinkErrorPolicy};

/// One year.
const MAX_MIN_INTERVAL: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// INI file with [API] and/or [MQTT] sections. Without it readings are only printed.
    #[arg(long, env = "SWITCHBOT_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TZ", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, value_enum, default_value_t)]
    pub mode: IterationMode,

    /// Seconds to listen for advertisements before each batch.
    #[arg(long, default_value_t = 2)]
    pub scan_window: u64,

    /// Minimum seconds between two forwarded readings of the same device.
    #[arg(
        long,
        default_value_t = 0,
        value_parser = clap::value_parser!(u64).range(..=MAX_MIN_INTERVAL),
    )]
    pub min_interval: u64,

    #[arg(long, value_enum, default_value_t)]
    pub on_sink_error: SinkErrorPolicy,

    /// Seconds to keep retrying a failing scanner before giving up.
    #[arg(long, default_value_t = 300)]
    pub scan_retry_limit: u64,

    /// Only forward these devices. May be repeated.
    #[arg(long = "device")]
    pub devices: Vec<MacAddr6>,
}
