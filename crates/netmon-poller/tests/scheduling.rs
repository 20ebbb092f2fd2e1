use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_core::Backoff;
use netmon_device::DeviceInventory;
use netmon_poller::{PollObserver, Poller, PollerSettings};
use netmon_protocol::{Adapter, AdapterRegistry};
use netmon_types::{Device, MetricSample, Protocol};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// 每次轮询耗时 `latency`，记录最大并发数
struct SlowAdapter {
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowAdapter {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Adapter for SlowAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    async fn poll(&self, device: &Device) -> netmon_protocol::Result<Vec<MetricSample>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![MetricSample::new(&device.id, "latency_ms", 1.5)])
    }
}

#[derive(Default)]
struct Counter {
    polls: Mutex<HashMap<String, usize>>,
}

impl Counter {
    async fn count(&self, device_id: &str) -> usize {
        self.polls.lock().await.get(device_id).copied().unwrap_or(0)
    }

    async fn total(&self) -> usize {
        self.polls.lock().await.values().sum()
    }
}

#[async_trait]
impl PollObserver for Counter {
    async fn on_samples(&self, device: &Device, _samples: Vec<MetricSample>) {
        *self.polls.lock().await.entry(device.id.clone()).or_default() += 1;
    }

    async fn on_unreachable(&self, _device: &Device, _reason: &str, _at: DateTime<Utc>) {}

    async fn on_recovered(&self, _device: &Device, _at: DateTime<Utc>) {}
}

fn settings(workers: usize, rate_limit: u32) -> PollerSettings {
    PollerSettings {
        workers,
        rate_limit,
        rate_window: Duration::from_secs(60),
        max_retries: 0,
        backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
        ping_timeout: Duration::from_secs(30),
        snmp_timeout: Duration::from_secs(30),
        ssh_timeout: Duration::from_secs(30),
        drain_timeout: Duration::from_secs(30),
    }
}

fn device(id: &str, n: u8, interval_secs: u64) -> Device {
    Device::new(id, format!("10.1.0.{}", n).parse().unwrap())
        .with_protocols(vec![Protocol::Icmp])
        .with_poll_interval(Duration::from_secs(interval_secs))
}

async fn start(
    devices: Vec<Device>,
    adapter: Arc<SlowAdapter>,
    settings: PollerSettings,
) -> (
    Arc<Counter>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    let inventory = Arc::new(DeviceInventory::from_devices(devices).await.unwrap());
    let counter = Arc::new(Counter::default());
    let poller = Arc::new(Poller::new(
        inventory,
        Arc::new(registry),
        counter.clone(),
        settings,
    ));

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(poller.run(rx));
    (counter, tx, handle)
}

#[tokio::test(start_paused = true)]
async fn test_devices_polled_at_their_interval() {
    let devices = vec![device("a", 1, 10), device("b", 2, 30)];
    let (counter, tx, handle) = start(devices, SlowAdapter::new(Duration::ZERO), settings(4, 1000)).await;

    tokio::time::sleep(Duration::from_secs(65)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    // a: 0,10,...,60；b 首轮错开到 15s：15,45
    let a = counter.count("a").await;
    let b = counter.count("b").await;
    assert!((6..=7).contains(&a), "a polled {} times", a);
    assert_eq!(b, 2);
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_bounds_concurrency() {
    let devices: Vec<Device> = (1..=6).map(|n| device(&format!("d{}", n), n, 1)).collect();
    let adapter = SlowAdapter::new(Duration::from_secs(3));
    let (counter, tx, handle) = start(devices, adapter.clone(), settings(2, 1000)).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(adapter.peak.load(Ordering::SeqCst), 2);
    assert!(counter.total().await >= 6);
}

#[tokio::test(start_paused = true)]
async fn test_global_rate_limit() {
    let devices: Vec<Device> = (1..=10).map(|n| device(&format!("d{}", n), n, 5)).collect();
    let (counter, tx, handle) = start(devices, SlowAdapter::new(Duration::ZERO), settings(10, 5)).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    // 满桶 5 次 + 30 秒内补充约 2.5 次
    let total = counter.total().await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    assert!((5..=8).contains(&total), "polled {} times", total);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_poll() {
    let (counter, tx, handle) = start(
        vec![device("a", 1, 60)],
        SlowAdapter::new(Duration::from_secs(5)),
        settings(1, 1000),
    )
    .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(counter.count("a").await, 1);
}
