mod console;
mod http;
mod mqtt;

pub use console::*;
pub use http::*;
pub use mqtt::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::Record;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode record")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write record")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("HTTP endpoint responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("MQTT request failed")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("failed to connect to MQTT broker")]
    Connect(#[from] rumqttc::ConnectionError),

    #[error("timed out connecting to MQTT broker")]
    ConnectTimeout,
}

/// Outbound delivery target for records.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn deliver(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Release connections. Called once, after the last delivery.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
