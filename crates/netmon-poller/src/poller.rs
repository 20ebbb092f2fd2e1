use crate::observer::PollObserver;
use crate::schedule::PollSchedule;
use chrono::Utc;
use metrics::counter;
use netmon_config::{PollerConfig, RuntimeSettings};
use netmon_core::{Backoff, ErrorClass, TokenBucket};
use netmon_device::{DeviceInventory, ReachabilityChange};
use netmon_protocol::{AdapterError, AdapterRegistry};
use netmon_shutdown::InFlightTracker;
use netmon_types::{Device, Protocol};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 轮询器参数
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// 工作池大小
    pub workers: usize,
    /// 每个窗口内最多发起的轮询次数（含重试）
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    pub backoff: Backoff,
    pub ping_timeout: Duration,
    pub snmp_timeout: Duration,
    pub ssh_timeout: Duration,
    /// 停止时等待在途轮询的最长时间
    pub drain_timeout: Duration,
}

impl PollerSettings {
    pub fn from_runtime(runtime: &RuntimeSettings, config: &PollerConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            rate_limit: runtime.poll_rate_limit.max(1),
            rate_window: runtime.poll_window,
            max_retries: runtime.max_retries,
            backoff: Backoff::default(),
            ping_timeout: runtime.ping_timeout,
            snmp_timeout: runtime.snmp_timeout,
            ssh_timeout: runtime.ssh_timeout,
            drain_timeout: Duration::from_secs(30),
        }
    }

    /// 协议对应的轮询截止时间
    pub fn timeout_for(&self, protocol: Protocol) -> Duration {
        match protocol {
            Protocol::Icmp => self.ping_timeout,
            Protocol::Snmp => self.snmp_timeout,
            Protocol::Ssh => self.ssh_timeout,
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_runtime(&RuntimeSettings::default(), &PollerConfig::default())
    }
}

/// 单台设备一次轮询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded { samples: usize, attempts: u32 },
    Unreachable { attempts: u32, reason: String },
    /// 响应无法解析，样本丢弃
    Discarded(String),
    /// 配置错误，设备已禁用
    Disabled(String),
    /// 停止中，未执行
    Skipped,
}

/// 设备轮询器
pub struct Poller {
    inventory: Arc<DeviceInventory>,
    adapters: Arc<AdapterRegistry>,
    observer: Arc<dyn PollObserver>,
    settings: PollerSettings,
    limiter: TokenBucket,
    workers: Arc<Semaphore>,
    in_flight: InFlightTracker,
}

impl Poller {
    pub fn new(
        inventory: Arc<DeviceInventory>,
        adapters: Arc<AdapterRegistry>,
        observer: Arc<dyn PollObserver>,
        settings: PollerSettings,
    ) -> Self {
        let limiter = TokenBucket::per_window(settings.rate_limit, settings.rate_window);
        let workers = Arc::new(Semaphore::new(settings.workers.max(1)));
        let in_flight = InFlightTracker::new(settings.drain_timeout);
        Self {
            inventory,
            adapters,
            observer,
            settings,
            limiter,
            workers,
            in_flight,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn in_flight(&self) -> InFlightTracker {
        self.in_flight.clone()
    }

    /// 轮询一台设备（含重试），并把结果交给观察者
    pub async fn poll_device(&self, device: &Device) -> PollOutcome {
        let Some(_guard) = self.in_flight.acquire() else {
            return PollOutcome::Skipped;
        };

        let adapter = match self.adapters.select(device) {
            Ok(adapter) => adapter,
            Err(e) => return self.disable(device, &e).await,
        };
        let protocol = adapter.protocol();
        let deadline = self.settings.timeout_for(protocol);

        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            self.limiter.acquire().await;
            counter!("netmon_polls_total", 1, "protocol" => protocol.as_str());

            let result = match tokio::time::timeout(deadline, adapter.poll(device)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout(deadline)),
            };

            let e = match result {
                Ok(samples) => return self.succeeded(device, samples, attempt).await,
                Err(e) => e,
            };

            counter!("netmon_poll_failures_total", 1, "protocol" => protocol.as_str());
            match e.class() {
                ErrorClass::Configuration => return self.disable(device, &e).await,
                ErrorClass::Data => {
                    warn!(device_id = %device.id, error = %e, "Discarding malformed poll response");
                    return PollOutcome::Discarded(e.to_string());
                }
                _ => {}
            }

            if attempt > self.settings.max_retries {
                break e;
            }
            let delay = self.settings.backoff.delay(attempt);
            debug!(
                device_id = %device.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Poll failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        self.unreachable(device, last_error, attempt).await
    }

    async fn succeeded(
        &self,
        device: &Device,
        samples: Vec<netmon_types::MetricSample>,
        attempts: u32,
    ) -> PollOutcome {
        let now = Utc::now();
        match self.inventory.mark_reachable(&device.id, now).await {
            Ok(ReachabilityChange::BecameReachable) => {
                self.observer.on_recovered(device, now).await;
            }
            Ok(_) => {}
            Err(e) => warn!(device_id = %device.id, error = %e, "Failed to update reachability"),
        }

        let count = samples.len();
        debug!(device_id = %device.id, samples = count, attempts, "Poll succeeded");
        self.observer.on_samples(device, samples).await;
        PollOutcome::Succeeded {
            samples: count,
            attempts,
        }
    }

    async fn unreachable(&self, device: &Device, error: AdapterError, attempts: u32) -> PollOutcome {
        let reason = error.to_string();
        if let Err(e) = self.inventory.mark_unreachable(&device.id).await {
            warn!(device_id = %device.id, error = %e, "Failed to update reachability");
        }
        warn!(device_id = %device.id, attempts, reason = %reason, "Poll retries exhausted");
        self.observer
            .on_unreachable(device, &reason, Utc::now())
            .await;
        PollOutcome::Unreachable { attempts, reason }
    }

    async fn disable(&self, device: &Device, error: &AdapterError) -> PollOutcome {
        let reason = error.to_string();
        error!(device_id = %device.id, reason = %reason, "Configuration error, disabling device");
        if let Err(e) = self.inventory.disable(&device.id, reason.clone()).await {
            warn!(device_id = %device.id, error = %e, "Failed to disable device");
        }
        PollOutcome::Disabled(reason)
    }

    /// 立即轮询所有启用的设备一次（受工作池约束）
    pub async fn poll_all(self: &Arc<Self>) -> Vec<(String, PollOutcome)> {
        let mut tasks = JoinSet::new();
        for device in self.inventory.enabled().await {
            let poller = self.clone();
            tasks.spawn(async move {
                let _permit = poller.workers.clone().acquire_owned().await.ok();
                let outcome = poller.poll_device(&device).await;
                (device.id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Poll task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// 调度循环，直到收到停止信号；退出前等待在途轮询完成
    pub async fn run<T: Clone + Send + 'static>(self: Arc<Self>, mut shutdown: broadcast::Receiver<T>) {
        let mut schedule = PollSchedule::new();
        let start = Instant::now();
        let devices = self.inventory.enabled().await;
        // 首轮在一个轮询周期内错开，避免同时发起
        let spread = devices.len().max(1) as u32;
        for (i, device) in devices.iter().enumerate() {
            let offset = device.poll_interval / spread * i as u32;
            schedule.schedule(device.id.clone(), start + offset);
        }
        info!(
            devices = schedule.len(),
            workers = self.settings.workers,
            "Poller started"
        );

        let mut tasks: JoinSet<(String, Instant)> = JoinSet::new();

        'scheduler: loop {
            let next_due = schedule
                .next_due()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(60));

            tokio::select! {
                _ = shutdown.recv() => break 'scheduler,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((device_id, due)) => {
                        schedule.schedule(device_id, due);
                    }
                    Err(e) => error!(error = %e, "Poll task failed"),
                },
                _ = tokio::time::sleep_until(next_due) => {
                    while let Some(device_id) = schedule.pop_due(Instant::now()) {
                        let device = match self.inventory.get(&device_id).await {
                            Some(device) if device.enabled => device,
                            _ => {
                                debug!(device_id = %device_id, "Device no longer enabled, unscheduled");
                                continue;
                            }
                        };

                        let permit = tokio::select! {
                            permit = self.workers.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break 'scheduler,
                            },
                            _ = shutdown.recv() => break 'scheduler,
                        };

                        let poller = self.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            let started = Instant::now();
                            poller.poll_device(&device).await;
                            // 两次轮询的开始时间间隔不小于设备的轮询周期
                            let due = (started + device.poll_interval).max(Instant::now());
                            (device.id, due)
                        });
                    }
                }
            }
        }

        info!(in_flight = self.in_flight.active_count(), "Poller stopping");
        let drained = self.in_flight.drain().await;
        if drained {
            while tasks.join_next().await.is_some() {}
        } else {
            // 未完成的轮询继续在后台运行直到结束，不中途取消
            tasks.detach_all();
        }
        info!(drained, "Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use netmon_protocol::Adapter;
    use netmon_types::MetricSample;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        FailTimes(u32),
        AlwaysFail,
        Hang,
        Malformed,
        MissingCredentials,
    }

    struct FakeAdapter {
        behaviour: Behaviour,
        calls: AtomicU32,
    }

    impl FakeAdapter {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        fn protocol(&self) -> Protocol {
            Protocol::Snmp
        }

        async fn poll(&self, device: &Device) -> netmon_protocol::Result<Vec<MetricSample>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behaviour {
                Behaviour::Ok => Ok(vec![MetricSample::new(&device.id, "cpu_utilization", 12.0)]),
                Behaviour::FailTimes(n) if call <= n => {
                    Err(AdapterError::Unreachable("no response".into()))
                }
                Behaviour::FailTimes(_) => {
                    Ok(vec![MetricSample::new(&device.id, "cpu_utilization", 12.0)])
                }
                Behaviour::AlwaysFail => Err(AdapterError::Unreachable("no response".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(vec![])
                }
                Behaviour::Malformed => Err(AdapterError::malformed("garbage")),
                Behaviour::MissingCredentials => {
                    Err(AdapterError::MissingCredentials("community".into()))
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        samples: Mutex<Vec<MetricSample>>,
        unreachable: Mutex<Vec<String>>,
        recovered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PollObserver for Recorder {
        async fn on_samples(&self, _device: &Device, samples: Vec<MetricSample>) {
            self.samples.lock().await.extend(samples);
        }

        async fn on_unreachable(&self, device: &Device, _reason: &str, _at: DateTime<Utc>) {
            self.unreachable.lock().await.push(device.id.clone());
        }

        async fn on_recovered(&self, device: &Device, _at: DateTime<Utc>) {
            self.recovered.lock().await.push(device.id.clone());
        }
    }

    fn device(id: &str) -> Device {
        Device::new(id, "10.0.0.1".parse().unwrap()).with_protocols(vec![Protocol::Snmp])
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            workers: 4,
            rate_limit: 100,
            rate_window: Duration::from_secs(60),
            max_retries: 3,
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(2)),
            ping_timeout: Duration::from_secs(2),
            snmp_timeout: Duration::from_secs(5),
            ssh_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }

    async fn poller(behaviour: Behaviour) -> (Arc<Poller>, Arc<FakeAdapter>, Arc<Recorder>, Arc<DeviceInventory>) {
        let adapter = FakeAdapter::new(behaviour);
        let mut registry = AdapterRegistry::new();
        registry.register(adapter.clone());
        let inventory = Arc::new(DeviceInventory::from_devices(vec![device("r1")]).await.unwrap());
        let recorder = Arc::new(Recorder::default());
        let poller = Arc::new(Poller::new(
            inventory.clone(),
            Arc::new(registry),
            recorder.clone(),
            settings(),
        ));
        (poller, adapter, recorder, inventory)
    }

    #[tokio::test]
    async fn test_successful_poll_forwards_samples() {
        let (poller, _, recorder, inventory) = poller(Behaviour::Ok).await;

        let outcome = poller.poll_device(&device("r1")).await;

        assert_eq!(outcome, PollOutcome::Succeeded { samples: 1, attempts: 1 });
        assert_eq!(recorder.samples.lock().await.len(), 1);
        assert!(inventory.get("r1").await.unwrap().last_seen.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let (poller, adapter, recorder, _) = poller(Behaviour::FailTimes(2)).await;

        let outcome = poller.poll_device(&device("r1")).await;

        assert_eq!(outcome, PollOutcome::Succeeded { samples: 1, attempts: 3 });
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
        assert!(recorder.unreachable.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_marks_unreachable() {
        let (poller, adapter, recorder, inventory) = poller(Behaviour::AlwaysFail).await;

        let outcome = poller.poll_device(&device("r1")).await;

        assert!(matches!(outcome, PollOutcome::Unreachable { attempts: 4, .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
        assert_eq!(*recorder.unreachable.lock().await, vec!["r1".to_string()]);
        assert_eq!(
            inventory.get("r1").await.unwrap().reachability,
            netmon_types::Reachability::Unreachable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reported_once() {
        let (poller, _, recorder, inventory) = poller(Behaviour::Ok).await;
        inventory.mark_unreachable("r1").await.unwrap();

        poller.poll_device(&device("r1")).await;
        poller.poll_device(&device("r1")).await;

        assert_eq!(*recorder.recovered.lock().await, vec!["r1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_as_failure() {
        let (poller, adapter, _, _) = poller(Behaviour::Hang).await;

        let start = Instant::now();
        let outcome = poller.poll_device(&device("r1")).await;

        assert!(matches!(outcome, PollOutcome::Unreachable { attempts: 4, .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
        // 4 次 SNMP 截止时间 + 3 次退避
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_malformed_response_discarded() {
        let (poller, adapter, recorder, inventory) = poller(Behaviour::Malformed).await;

        let outcome = poller.poll_device(&device("r1")).await;

        assert!(matches!(outcome, PollOutcome::Discarded(_)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert!(recorder.samples.lock().await.is_empty());
        assert!(inventory.get("r1").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_configuration_error_disables_device() {
        let (poller, _, recorder, inventory) = poller(Behaviour::MissingCredentials).await;

        let outcome = poller.poll_device(&device("r1")).await;

        assert!(matches!(outcome, PollOutcome::Disabled(_)));
        assert!(!inventory.get("r1").await.unwrap().enabled);
        assert!(recorder.unreachable.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_adapter_disables_device() {
        let (poller, _, _, inventory) = poller(Behaviour::Ok).await;
        let ssh_only = Device::new("r2", "10.0.0.2".parse().unwrap()).with_protocols(vec![Protocol::Ssh]);
        inventory.register(ssh_only.clone()).await.unwrap();

        let outcome = poller.poll_device(&ssh_only).await;

        assert!(matches!(outcome, PollOutcome::Disabled(_)));
        assert!(!inventory.get("r2").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_draining_skips_new_polls() {
        let (poller, adapter, _, _) = poller(Behaviour::Ok).await;
        poller.in_flight().begin_drain();

        assert_eq!(poller.poll_device(&device("r1")).await, PollOutcome::Skipped);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeouts_per_protocol() {
        let s = settings();
        assert_eq!(s.timeout_for(Protocol::Icmp), Duration::from_secs(2));
        assert_eq!(s.timeout_for(Protocol::Snmp), Duration::from_secs(5));
        assert_eq!(s.timeout_for(Protocol::Ssh), Duration::from_secs(10));
    }
}
