use crate::channel::Channel;
use crate::email::EmailChannel;
use crate::error::ChannelError;
use crate::health::DispatchHealth;
use crate::message::NotifyMessage;
use crate::webhook::WebhookChannel;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use netmon_alert::{Alert, ConditionSignature, Notification, Transition};
use netmon_config::{CredentialResolver, NotificationConfig};
use netmon_core::{Backoff, ExpiringStore, TokenBucket, TtlMap};
use netmon_types::{BusinessService, Severity};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// 分发器参数
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// 每个渠道的最大尝试次数（含首次）
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// 单次投递的截止时间，超时按失败计入重试
    pub delivery_timeout: Duration,
    /// 每个渠道每分钟最多发送条数
    pub channel_rate_per_minute: u32,
    /// 幂等记录保留时长
    pub idempotency_ttl: chrono::Duration,
}

impl DispatcherSettings {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_secs(30),
            ),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs.max(1)),
            channel_rate_per_minute: config.channel_rate_per_minute.max(1),
            idempotency_ttl: chrono::Duration::hours(24),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

/// 单个渠道的投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered { attempts: u32 },
    /// 幂等键已投递过
    Duplicate,
    /// 渠道未启用
    Skipped,
    Failed { attempts: u32, error: String },
}

/// 一条通知在所有路由渠道上的投递结果
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub key: String,
    pub severity: Severity,
    pub outcomes: Vec<(String, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ChannelOutcome::Delivered { .. }))
            .count()
    }

    /// 没有任何渠道送达（重复投递视为已送达）
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty()
            && self.outcomes.iter().all(|(_, o)| {
                !matches!(o, ChannelOutcome::Delivered { .. } | ChannelOutcome::Duplicate)
            })
    }

    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, o)| o)
    }
}

struct ChannelSlot {
    channel: Arc<dyn Channel>,
    limiter: TokenBucket,
}

/// 交给渠道工作者的一条通知，最后一个完成的渠道负责汇总结果
struct InFlight {
    message: NotifyMessage,
    digest: bool,
    remaining: AtomicUsize,
    delivered: AtomicUsize,
    succeeded: AtomicBool,
}

type ChannelQueues = HashMap<String, mpsc::UnboundedSender<Arc<InFlight>>>;

/// 通知分发器
///
/// 按级别路由到渠道；同一渠道上同一幂等键只投递一次；
/// 每个渠道独立限流，瞬时失败按指数退避重试。
/// `run` 为每个渠道启动一个工作者，慢渠道不会拖住其他渠道。
pub struct Dispatcher {
    settings: DispatcherSettings,
    channels: HashMap<String, ChannelSlot>,
    routes: HashMap<Severity, Vec<String>>,
    /// 业务服务名 -> 联系人
    contacts: HashMap<String, Vec<String>>,
    delivered: Mutex<TtlMap<String, DateTime<Utc>>>,
    health: DispatchHealth,
    closing: Notify,
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            channels: HashMap::new(),
            routes: HashMap::new(),
            contacts: HashMap::new(),
            delivered: Mutex::new(TtlMap::new()),
            health: DispatchHealth::new(),
            closing: Notify::new(),
        }
    }

    /// 按配置构建渠道和路由
    ///
    /// 渠道构建失败（缺少凭据、地址非法）只记录错误并跳过该渠道。
    pub fn from_config(
        config: &NotificationConfig,
        services: &[BusinessService],
        resolver: &dyn CredentialResolver,
    ) -> Self {
        let settings = DispatcherSettings::from_config(config);
        let timeout = settings.delivery_timeout;
        let mut dispatcher = Self::new(settings).with_services(services);

        if let Some(email) = &config.email {
            match EmailChannel::from_config(email, resolver, timeout) {
                Ok(channel) => dispatcher = dispatcher.with_channel(Arc::new(channel)),
                Err(e) => error!(channel = "email", error = %e, "Failed to configure channel"),
            }
        }
        if let Some(webhook) = &config.webhook {
            match WebhookChannel::from_config(webhook, resolver, timeout) {
                Ok(channel) => dispatcher = dispatcher.with_channel(Arc::new(channel)),
                Err(e) => error!(channel = "webhook", error = %e, "Failed to configure channel"),
            }
        }

        for severity in Severity::ALL {
            dispatcher = dispatcher.with_route(severity, config.routes_for(severity));
        }
        dispatcher
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        let limiter = TokenBucket::per_window(
            self.settings.channel_rate_per_minute,
            Duration::from_secs(60),
        );
        info!(channel = channel.name(), "Registered notification channel");
        self.channels
            .insert(channel.name().to_string(), ChannelSlot { channel, limiter });
        self
    }

    pub fn with_route(mut self, severity: Severity, channels: Vec<String>) -> Self {
        self.routes.insert(severity, channels);
        self
    }

    pub fn with_services(mut self, services: &[BusinessService]) -> Self {
        for service in services {
            if !service.contacts.is_empty() {
                self.contacts
                    .insert(service.name.clone(), service.contacts.clone());
            }
        }
        self
    }

    pub fn health(&self) -> DispatchHealth {
        self.health.clone()
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// 投递一条通知到其级别配置的所有渠道，各渠道并发投递
    pub async fn dispatch(&self, notification: &Notification) -> DispatchReport {
        let message = NotifyMessage::render(notification, &self.contacts);
        let mut report = DispatchReport {
            key: message.idempotency_key.clone(),
            severity: message.severity,
            outcomes: Vec::new(),
        };

        let routes = self.routes_for(&message);
        if routes.is_empty() {
            return report;
        }

        let outcomes = join_all(routes.iter().map(|name| self.deliver_to(name, &message))).await;
        report.outcomes = routes.into_iter().zip(outcomes).collect();

        self.conclude(
            &message,
            notification.is_digest(),
            report.delivered(),
            report.all_failed(),
        );
        report
    }

    fn routes_for(&self, message: &NotifyMessage) -> Vec<String> {
        let routes = self
            .routes
            .get(&message.severity)
            .cloned()
            .unwrap_or_default();
        if routes.is_empty() {
            warn!(
                severity = %message.severity,
                key = %message.idempotency_key,
                "No channel routed for severity, notification not delivered"
            );
            self.health.record_unrouted();
        }
        routes
    }

    /// 所有路由渠道都有结果后的汇总
    fn conclude(&self, message: &NotifyMessage, digest: bool, delivered: usize, all_failed: bool) {
        if all_failed {
            error!(
                severity = %message.severity,
                key = %message.idempotency_key,
                title = %message.title,
                "All channels failed for notification"
            );
            self.health.record_tier_failure();
        } else if digest && delivered > 0 {
            self.health.record_digest();
            counter!("netmon_digests_sent_total", 1);
        }
    }

    /// 把通知放入各路由渠道的队列
    async fn enqueue(&self, notification: &Notification, queues: &ChannelQueues) {
        let message = NotifyMessage::render(notification, &self.contacts);
        let routes = self.routes_for(&message);
        if routes.is_empty() {
            return;
        }

        let job = Arc::new(InFlight {
            message,
            digest: notification.is_digest(),
            remaining: AtomicUsize::new(routes.len()),
            delivered: AtomicUsize::new(0),
            succeeded: AtomicBool::new(false),
        });
        for name in routes {
            let queued = queues
                .get(&name)
                .map_or(false, |queue| queue.send(job.clone()).is_ok());
            if !queued {
                // 未知渠道立即得到失败结果
                let outcome = self.deliver_to(&name, &job.message).await;
                self.settle(&job, &outcome);
            }
        }
    }

    fn settle(&self, job: &InFlight, outcome: &ChannelOutcome) {
        match outcome {
            ChannelOutcome::Delivered { .. } => {
                job.delivered.fetch_add(1, Ordering::SeqCst);
                job.succeeded.store(true, Ordering::SeqCst);
            }
            ChannelOutcome::Duplicate => job.succeeded.store(true, Ordering::SeqCst),
            ChannelOutcome::Skipped | ChannelOutcome::Failed { .. } => {}
        }
        if job.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.conclude(
                &job.message,
                job.digest,
                job.delivered.load(Ordering::SeqCst),
                !job.succeeded.load(Ordering::SeqCst),
            );
        }
    }

    /// 单个渠道的投递循环，按入队顺序逐条投递
    async fn channel_worker(
        self: Arc<Self>,
        name: String,
        mut queue: mpsc::UnboundedReceiver<Arc<InFlight>>,
    ) {
        while let Some(job) = queue.recv().await {
            let outcome = self.deliver_to(&name, &job.message).await;
            self.settle(&job, &outcome);
        }
        debug!(channel = %name, "Channel worker stopped");
    }

    async fn deliver_to(&self, name: &str, message: &NotifyMessage) -> ChannelOutcome {
        let Some(slot) = self.channels.get(name) else {
            warn!(channel = name, "Route references unknown channel");
            return ChannelOutcome::Failed {
                attempts: 0,
                error: format!("unknown channel {}", name),
            };
        };
        if !slot.channel.is_enabled() {
            return ChannelOutcome::Skipped;
        }

        let key = format!("{}|{}", name, message.idempotency_key);
        if self.delivered.lock().await.contains(&key, Utc::now()) {
            debug!(channel = name, key = %message.idempotency_key, "Duplicate notification skipped");
            self.health.record_duplicate();
            return ChannelOutcome::Duplicate;
        }

        slot.limiter.acquire().await;

        match self.deliver_with_retry(slot.channel.as_ref(), message).await {
            Ok(attempts) => {
                let now = Utc::now();
                self.delivered
                    .lock()
                    .await
                    .insert(key, now, now + self.settings.idempotency_ttl);
                self.health.record_delivered();
                counter!(
                    "netmon_notifications_sent_total", 1,
                    "channel" => name.to_string(),
                    "severity" => message.severity.as_str()
                );
                info!(
                    channel = name,
                    key = %message.idempotency_key,
                    attempts,
                    "Notification delivered"
                );
                ChannelOutcome::Delivered { attempts }
            }
            Err((attempts, e)) => {
                self.health.record_failed();
                counter!(
                    "netmon_notification_failures_total", 1,
                    "channel" => name.to_string()
                );
                warn!(
                    channel = name,
                    key = %message.idempotency_key,
                    attempts,
                    error = %e,
                    "Notification delivery failed"
                );
                ChannelOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn deliver_with_retry(
        &self,
        channel: &dyn Channel,
        message: &NotifyMessage,
    ) -> std::result::Result<u32, (u32, ChannelError)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.settings.delivery_timeout, channel.deliver(message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::Timeout),
                };

            match result {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    let delay = self.settings.backoff.delay(attempt);
                    debug!(
                        channel = channel.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient delivery failure, retrying"
                    );
                    self.health.record_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    /// 每个级别发送一条测试通知
    pub async fn send_test(&self) -> Vec<DispatchReport> {
        let now = Utc::now();
        let mut reports = Vec::new();
        for severity in Severity::ALL {
            let mut alert = Alert::new(
                "netmon",
                ConditionSignature::new("notification_test"),
                severity,
                format!("Test {} notification from netmon", severity),
                now,
                chrono::Duration::zero(),
            );
            alert.message = format!(
                "{} (channels: {})",
                alert.message,
                self.routes
                    .get(&severity)
                    .map(|r| r.join(", "))
                    .unwrap_or_default()
            );
            reports.push(
                self.dispatch(&Notification::alert(alert, Transition::Raised))
                    .await,
            );
        }
        reports
    }

    /// 请求停止：处理完队列中剩余的通知后 `run` 返回
    pub fn close(&self) {
        self.closing.notify_one();
    }

    /// 分发循环，发送端全部关闭或调用 `close` 后退出
    ///
    /// 退出前等待各渠道工作者投递完已入队的通知。
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Notification>) {
        info!(channels = ?self.channel_names(), "Notification dispatcher started");

        let mut workers = JoinSet::new();
        let mut queues = ChannelQueues::new();
        for name in self.channel_names() {
            let (tx, queue) = mpsc::unbounded_channel();
            workers.spawn(self.clone().channel_worker(name.clone(), queue));
            queues.insert(name, tx);
        }

        let mut sweep = tokio::time::interval(Duration::from_secs(600));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(notification) => {
                        self.enqueue(&notification, &queues).await;
                    }
                    None => break,
                },
                _ = self.closing.notified() => {
                    rx.close();
                    let mut drained = 0usize;
                    while let Some(notification) = rx.recv().await {
                        self.enqueue(&notification, &queues).await;
                        drained += 1;
                    }
                    info!(drained, "Dispatcher drained queued notifications");
                    break;
                }
                _ = sweep.tick() => {
                    let evicted = self.delivered.lock().await.sweep(Utc::now()).len();
                    if evicted > 0 {
                        debug!(evicted, "Expired idempotency records swept");
                    }
                }
            }
        }

        drop(queues);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Channel worker ended abnormally");
            }
        }
        info!("Notification dispatcher stopped");
    }
}
