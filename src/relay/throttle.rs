use std::collections::HashMap;

use chrono::{DateTime, TimeDelta};
use chrono_tz::Tz;
use macaddr::MacAddr6;

use crate::switchbot::Reading;

#[derive(Debug)]
pub(super) struct Throttle {
    min_interval: TimeDelta,
    last_delivered: HashMap<MacAddr6, DateTime<Tz>>,
}

impl Throttle {
    pub(super) fn new(min_interval: TimeDelta) -> Self {
        Self {
            min_interval,
            last_delivered: HashMap::new(),
        }
    }

    pub(super) fn allows(&self, reading: &Reading) -> bool {
        if self.min_interval <= TimeDelta::zero() {
            return true;
        }

        match self.last_delivered.get(&reading.mac) {
            Some(&last_delivered) => reading.timestamp - last_delivered >= self.min_interval,
            None => true,
        }
    }

    /// Starts the suppression window. Only call once a sink took the reading.
    pub(super) fn record_delivered(&mut self, reading: &Reading) {
        if self.min_interval > TimeDelta::zero() {
            self.last_delivered.insert(reading.mac, reading.timestamp);
        }
    }
}
