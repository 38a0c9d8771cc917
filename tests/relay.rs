use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone as _};
use chrono_tz::Tz;
use macaddr::MacAddr6;
use pretty_assertions::assert_eq;
use switchbot_relay::{
    record::Record,
    relay::{IterationMode, Relay, RelayError, RelayOptions, SinkErrorPolicy, SinkStats},
    scanner::{Batch, ScanError, Scanner},
    sink::{Sink, SinkError},
    switchbot::{DeviceType, Mode, Reading},
};
use tokio::time::{sleep, timeout};

const LIVING_ROOM: MacAddr6 = MacAddr6::new(0xf4, 0xae, 0x1a, 0x28, 0xfe, 0x48);
const BEDROOM: MacAddr6 = MacAddr6::new(0xf5, 0xbf, 0x47, 0xe6, 0x11, 0x79);
const HALLWAY: MacAddr6 = MacAddr6::new(0xda, 0x5e, 0x04, 0x87, 0x5c, 0xef);

fn t0() -> DateTime<Tz> {
    chrono_tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn reading(mac: MacAddr6, seconds: i64) -> Reading {
    Reading {
        mac,
        model: DeviceType::Meter,
        mode: Mode::Celsius,
        timestamp: t0() + TimeDelta::seconds(seconds),
        temperature_celsius: 21.5,
        humidity_percent: 45,
    }
}

/// Replays a fixed script, then reports "nothing this time" forever.
#[derive(Clone)]
struct ScriptedScanner {
    script: Arc<Mutex<VecDeque<Result<Option<Batch>, ScanError>>>>,
    calls: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl ScriptedScanner {
    fn new(script: Vec<Result<Option<Batch>, ScanError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn batches(batches: Vec<Batch>) -> Self {
        Self::new(batches.into_iter().map(|b| Ok(Some(b))).collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scanner for ScriptedScanner {
    async fn next_batch(&mut self) -> Result<Option<Batch>, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(None))
    }

    async fn stop(&mut self) -> Result<(), ScanError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type Log = Arc<Mutex<Vec<(String, Record)>>>;

/// Appends every delivery to a log shared by all sinks of a test.
struct RecordingSink {
    name: &'static str,
    log: Log,
    fail: bool,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            fail: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn failing(name: &'static str, log: &Log) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn deliver(&mut self, record: &Record) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Io(std::io::Error::other("sink is down")));
        }
        self.log
            .lock()
            .unwrap()
            .push((self.name.to_owned(), record.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn entries(log: &Log) -> Vec<(String, String)> {
    log.lock()
        .unwrap()
        .iter()
        .map(|(sink, record)| (sink.clone(), record.mac.clone()))
        .collect()
}

fn single_shot() -> RelayOptions {
    RelayOptions {
        mode: IterationMode::SingleShot,
        ..RelayOptions::default()
    }
}

fn entry(sink: &str, mac: &str) -> (String, String) {
    (sink.to_owned(), mac.to_owned())
}

#[tokio::test]
async fn every_reading_reaches_every_sink_in_order() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![vec![
        reading(LIVING_ROOM, 0),
        reading(BEDROOM, 0),
        reading(HALLWAY, 0),
    ]]);
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(RecordingSink::new("http", &log)),
        Box::new(RecordingSink::new("mqtt", &log)),
        Box::new(RecordingSink::new("console", &log)),
    ];

    let mut relay = Relay::new(scanner, sinks, single_shot());
    relay.run(std::future::pending()).await.unwrap();

    let mut expected = Vec::new();
    for mac in ["f4:ae:1a:28:fe:48", "f5:bf:47:e6:11:79", "da:5e:04:87:5c:ef"] {
        for sink in ["http", "mqtt", "console"] {
            expected.push(entry(sink, mac));
        }
    }
    assert_eq!(entries(&log), expected);

    let stats = relay.stats();
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.readings, 3);
    assert_eq!(stats.suppressed, 0);
    assert_eq!(
        stats.sinks.keys().collect::<Vec<_>>(),
        vec!["http", "mqtt", "console"]
    );
    for sink_stats in stats.sinks.values() {
        assert_eq!(
            *sink_stats,
            SinkStats {
                delivered: 3,
                failed: 0
            }
        );
    }
}

#[tokio::test]
async fn single_shot_processes_exactly_one_batch() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![
        vec![reading(LIVING_ROOM, 0)],
        vec![reading(BEDROOM, 0)],
    ]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new("console", &log))];

    let mut relay = Relay::new(scanner.clone(), sinks, single_shot());
    relay.run(std::future::pending()).await.unwrap();

    assert_eq!(entries(&log), vec![entry("console", "f4:ae:1a:28:fe:48")]);
    assert_eq!(scanner.calls(), 1);
    assert!(scanner.stopped());
}

#[tokio::test]
async fn single_shot_with_empty_batch_exits_quietly() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![vec![]]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new("console", &log))];

    let mut relay = Relay::new(scanner.clone(), sinks, single_shot());
    relay.run(std::future::pending()).await.unwrap();

    assert!(entries(&log).is_empty());
    assert_eq!(scanner.calls(), 1);
}

#[tokio::test]
async fn continuous_mode_keeps_polling_until_stopped() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![
        vec![reading(LIVING_ROOM, 0)],
        vec![],
        vec![reading(BEDROOM, 0), reading(HALLWAY, 0)],
    ]);
    let console = RecordingSink::new("console", &log);
    let closed = console.closed.clone();
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(console)];

    let watched = scanner.clone();
    let shutdown = async move {
        // Past the script: the relay is idling on empty polls.
        while watched.calls() < 6 {
            sleep(Duration::from_millis(1)).await;
        }
    };

    let mut relay = Relay::new(scanner.clone(), sinks, RelayOptions::default());
    timeout(Duration::from_secs(10), relay.run(shutdown))
        .await
        .expect("relay did not stop")
        .unwrap();

    assert_eq!(
        entries(&log),
        vec![
            entry("console", "f4:ae:1a:28:fe:48"),
            entry("console", "f5:bf:47:e6:11:79"),
            entry("console", "da:5e:04:87:5c:ef"),
        ]
    );
    assert!(scanner.calls() >= 6);
    assert!(scanner.stopped());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn idle_polls_are_paced() {
    let scanner = ScriptedScanner::new(vec![Ok(Some(vec![]))]);
    let shutdown = sleep(Duration::from_secs(1));

    let mut relay = Relay::new(scanner.clone(), Vec::new(), RelayOptions::default());
    relay.run(shutdown).await.unwrap();

    let calls = scanner.calls();
    assert!((10..=11).contains(&calls), "{calls} polls in one second");
}

#[tokio::test]
async fn failing_sink_does_not_block_the_others() {
    let log = Log::default();
    let batch = vec![reading(LIVING_ROOM, 0), reading(BEDROOM, 0)];
    let scanner = ScriptedScanner::batches(vec![batch]);
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(RecordingSink::failing("http", &log)),
        Box::new(RecordingSink::new("console", &log)),
    ];

    let mut relay = Relay::new(scanner, sinks, single_shot());
    relay.run(std::future::pending()).await.unwrap();

    assert_eq!(
        entries(&log),
        vec![
            entry("console", "f4:ae:1a:28:fe:48"),
            entry("console", "f5:bf:47:e6:11:79"),
        ]
    );
    assert_eq!(
        relay.stats().sinks["http"],
        SinkStats {
            delivered: 0,
            failed: 2
        }
    );
    assert_eq!(
        relay.stats().sinks["console"],
        SinkStats {
            delivered: 2,
            failed: 0
        }
    );
}

#[tokio::test]
async fn abort_policy_stops_on_first_sink_failure_and_still_tears_down() {
    let log = Log::default();
    let batch = vec![reading(LIVING_ROOM, 0), reading(BEDROOM, 0)];
    let scanner = ScriptedScanner::batches(vec![batch]);
    let http = RecordingSink::failing("http", &log);
    let console = RecordingSink::new("console", &log);
    let http_closed = http.closed.clone();
    let console_closed = console.closed.clone();
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(http), Box::new(console)];

    let options = RelayOptions {
        on_sink_error: SinkErrorPolicy::Abort,
        ..single_shot()
    };
    let mut relay = Relay::new(scanner.clone(), sinks, options);
    let err = relay.run(std::future::pending()).await.unwrap_err();

    assert!(matches!(&err, RelayError::Sink { sink, .. } if sink == "http"), "{err:?}");
    assert!(entries(&log).is_empty());
    assert!(http_closed.load(Ordering::SeqCst));
    assert!(console_closed.load(Ordering::SeqCst));
    assert!(scanner.stopped());
}

#[tokio::test(start_paused = true)]
async fn scanner_failures_are_retried() {
    let log = Log::default();
    let scanner = ScriptedScanner::new(vec![
        Err(ScanError::Failed(anyhow!("adapter busy"))),
        Err(ScanError::Failed(anyhow!("adapter busy"))),
        Ok(Some(vec![reading(LIVING_ROOM, 0)])),
    ]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new("console", &log))];

    let mut relay = Relay::new(scanner.clone(), sinks, single_shot());
    relay.run(std::future::pending()).await.unwrap();

    assert_eq!(entries(&log), vec![entry("console", "f4:ae:1a:28:fe:48")]);
    assert_eq!(scanner.calls(), 3);
}

#[tokio::test]
async fn unavailable_scanner_is_fatal() {
    let log = Log::default();
    let scanner = ScriptedScanner::new(vec![Err(ScanError::Unavailable(anyhow!(
        "no Bluetooth adapters found"
    )))]);
    let console = RecordingSink::new("console", &log);
    let closed = console.closed.clone();
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(console)];

    let mut relay = Relay::new(scanner.clone(), sinks, RelayOptions::default());
    let err = relay.run(std::future::pending()).await.unwrap_err();

    assert!(matches!(err, RelayError::Scan(ScanError::Unavailable(_))), "{err:?}");
    assert_eq!(scanner.calls(), 1);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn throttle_suppresses_repeated_readings() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![vec![
        reading(LIVING_ROOM, 0),
        reading(LIVING_ROOM, 30),
        reading(BEDROOM, 30),
        reading(LIVING_ROOM, 61),
    ]]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new("console", &log))];

    let options = RelayOptions {
        min_interval: TimeDelta::minutes(1),
        ..single_shot()
    };
    let mut relay = Relay::new(scanner, sinks, options);
    relay.run(std::future::pending()).await.unwrap();

    assert_eq!(
        entries(&log),
        vec![
            entry("console", "f4:ae:1a:28:fe:48"),
            entry("console", "f5:bf:47:e6:11:79"),
            entry("console", "f4:ae:1a:28:fe:48"),
        ]
    );
    assert_eq!(relay.stats().readings, 4);
    assert_eq!(relay.stats().suppressed, 1);
}

#[tokio::test]
async fn device_allowlist_drops_other_devices() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![vec![
        reading(LIVING_ROOM, 0),
        reading(BEDROOM, 0),
        reading(HALLWAY, 0),
    ]]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new("console", &log))];

    let options = RelayOptions {
        devices: vec![BEDROOM, HALLWAY],
        ..single_shot()
    };
    let mut relay = Relay::new(scanner, sinks, options);
    relay.run(std::future::pending()).await.unwrap();

    assert_eq!(
        entries(&log),
        vec![
            entry("console", "f5:bf:47:e6:11:79"),
            entry("console", "da:5e:04:87:5c:ef"),
        ]
    );
    assert_eq!(relay.stats().suppressed, 1);
}

#[tokio::test]
async fn undelivered_readings_are_not_throttled() {
    let log = Log::default();
    let scanner = ScriptedScanner::batches(vec![vec![
        reading(LIVING_ROOM, 0),
        reading(LIVING_ROOM, 30),
    ]]);
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::failing("http", &log))];
    let options = RelayOptions {
        min_interval: TimeDelta::seconds(60),
        ..single_shot()
    };

    let mut relay = Relay::new(scanner, sinks, options);
    relay.run(std::future::pending()).await.unwrap();

    let stats = relay.stats();
    assert_eq!(stats.suppressed, 0);
    assert_eq!(
        stats.sinks["http"],
        SinkStats {
            delivered: 0,
            failed: 2
        }
    );
}
