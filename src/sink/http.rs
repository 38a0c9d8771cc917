use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::record::Record;
use crate::sink::{Sink, SinkError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_HEADER: &str = "X-API-KEY";

/// POSTs each record as JSON to the configured endpoint.
#[derive(Debug)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpSink {
    pub fn new(config: &ApiConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.data_endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut request = self.client.post(self.endpoint.clone()).json(record);
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(SinkError::Status(status));
        }

        debug!(endpoint = %self.endpoint, %status, mac = %record.mac, "posted record");

        Ok(())
    }
}
