use std::hash::Hash;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use btleplug::{
    api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter},
    platform::{Adapter, Manager, PeripheralId},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use indexmap::IndexMap;
use macaddr::MacAddr6;
use switchbot_relay::scanner::{Batch, ScanError, Scanner};
use tokio::time::{Instant, timeout_at};
use tokio_stream::{Stream, StreamExt as _};
use tracing::{debug, info};

use crate::ble::switchbot::decode_switchbot_ble_data;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Scans on the first Bluetooth adapter and decodes SwitchBot advertisements.
///
/// Each batch holds one reading per SwitchBot device that advertised during
/// the scan window, stamped with the time its last advertisement arrived.
/// Devices that went quiet are not reported again from the adapter's cache.
pub struct BleScanner {
    adapter: Adapter,
    events: EventStream,
    scan_window: Duration,
    timezone: Tz,
}

impl BleScanner {
    pub async fn start(scan_window: Duration, timezone: Tz) -> Result<Self, ScanError> {
        let manager = Manager::new()
            .await
            .context("failed to initialize Bluetooth manager")
            .map_err(ScanError::Unavailable)?;

        let adapters = manager
            .adapters()
            .await
            .context("failed to get Bluetooth adapters")
            .map_err(ScanError::Unavailable)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::Unavailable(anyhow!("no Bluetooth adapters found")))?;

        // Subscribe first so no advertisement between the two calls is lost.
        let events = adapter
            .events()
            .await
            .context("failed to subscribe to BLE events")
            .map_err(ScanError::Unavailable)?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .context("failed to start BLE scan")
            .map_err(ScanError::Unavailable)?;

        info!(?scan_window, "BLE scan started");

        Ok(Self {
            adapter,
            events,
            scan_window,
            timezone,
        })
    }
}

#[async_trait]
impl Scanner for BleScanner {
    async fn next_batch(&mut self) -> Result<Option<Batch>, ScanError> {
        let timezone = self.timezone;
        let advertised = collect_advertisements(
            &mut self.events,
            self.scan_window,
            advertiser,
            || Utc::now().with_timezone(&timezone),
        )
        .await?;

        let mut batch = Batch::new();
        for (peripheral_id, received_at) in &advertised {
            let peripheral = match self.adapter.peripheral(peripheral_id).await {
                Ok(p) => p,
                Err(err) => {
                    debug!("BLE peripheral went away: {peripheral_id}: {err:#}");
                    continue;
                }
            };

            let mac_address: MacAddr6 = peripheral.address().into_inner().into();

            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    debug!("BLE peripheral properties not available: {peripheral_id}");
                    continue;
                }
                Err(err) => {
                    debug!("failed to get BLE peripheral properties: {peripheral_id}: {err:#}");
                    continue;
                }
            };

            match decode_switchbot_ble_data(
                mac_address,
                &properties.manufacturer_data,
                &properties.service_data,
                *received_at,
            ) {
                Ok(reading) => batch.push(reading),
                Err(err) => {
                    debug!("skipping BLE peripheral: {peripheral_id} ({mac_address}): {err:#}");
                }
            }
        }

        debug!(
            readings = batch.len(),
            advertisers = advertised.len(),
            "scan cycle complete"
        );

        Ok(Some(batch))
    }

    async fn stop(&mut self) -> Result<(), ScanError> {
        self.adapter
            .stop_scan()
            .await
            .context("failed to stop BLE scan")
            .map_err(ScanError::Failed)?;

        info!("BLE scan stopped");

        Ok(())
    }
}

fn advertiser(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ManufacturerDataAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Listens to `events` for `window` and returns every advertiser with the
/// time of its latest advertisement, in order of first appearance.
async fn collect_advertisements<E, K, S>(
    events: &mut S,
    window: Duration,
    advertiser: impl Fn(E) -> Option<K>,
    mut now: impl FnMut() -> DateTime<Tz>,
) -> Result<IndexMap<K, DateTime<Tz>>, ScanError>
where
    S: Stream<Item = E> + Unpin,
    K: Hash + Eq,
{
    let deadline = Instant::now() + window;
    let mut advertised = IndexMap::new();

    while Instant::now() < deadline {
        match timeout_at(deadline, events.next()).await {
            Err(_) => break,
            Ok(None) => {
                return Err(ScanError::Unavailable(anyhow!("BLE event stream closed")));
            }
            Ok(Some(event)) => {
                if let Some(id) = advertiser(event) {
                    advertised.insert(id, now());
                }
            }
        }
    }

    Ok(advertised)
}
