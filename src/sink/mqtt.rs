use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, Outgoing, QoS};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;
use crate::record::Record;
use crate::sink::{Sink, SinkError};

const REQUESTS_CAP: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Publishes each record as JSON, QoS 0, not retained.
///
/// The connection is established before the sink is handed out and is driven
/// by a background task until [`Sink::close`] disconnects it. Dropping the
/// sink without closing it aborts the task.
#[derive(Debug)]
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    event_task: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub async fn connect(config: &MqttConfig) -> Result<Self, SinkError> {
        let (client, mut event_loop) = AsyncClient::new(config.mqtt_options(), REQUESTS_CAP);

        timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| SinkError::ConnectTimeout)??;

        info!(
            server = %config.server,
            port = config.port,
            topic = %config.topic,
            "connected to MQTT broker"
        );

        Ok(Self {
            client,
            topic: config.topic.clone(),
            event_task: Some(tokio::spawn(drive(event_loop))),
        })
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), SinkError> {
    loop {
        match event_loop.poll().await? {
            Event::Incoming(Incoming::ConnAck(_)) => return Ok(()),
            notification => trace!(?notification, "MQTT event"),
        }
    }
}

async fn drive(mut event_loop: EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(notification) => trace!(?notification, "MQTT event"),
            Err(err) => {
                // The next poll reconnects.
                warn!("MQTT connection error: {err}");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn deliver(&mut self, record: &Record) -> Result<(), SinkError> {
        let payload = record.to_json()?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)?;

        trace!(topic = %self.topic, mac = %record.mac, "queued record");

        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut event_task) = self.event_task.take() else {
            return Ok(());
        };

        let result = self.client.try_disconnect();

        if timeout(CLOSE_TIMEOUT, &mut event_task).await.is_err() {
            warn!("MQTT disconnect did not complete in time");
            event_task.abort();
        }

        result.map_err(SinkError::from)
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        if let Some(event_task) = self.event_task.take() {
            event_task.abort();
        }
    }
}
