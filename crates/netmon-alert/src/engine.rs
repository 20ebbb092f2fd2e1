use crate::correlation::{CorrelationContext, Correlator, JoinOutcome};
use crate::error::{AlertError, Result};
use crate::history::AlertHistory;
use crate::model::{Alert, AlertState, ConditionSignature, Delivery};
use crate::notification::{DigestEntry, Notification, Transition};
use crate::ratecap::RateCap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use netmon_core::{ExpiringStore, TtlMap};
use netmon_device::DeviceInventory;
use netmon_topology::{TopologyDiff, TopologyListener, TopologySnapshot, TopologyView};
use netmon_types::{BusinessService, MetricSample, Runbook, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// 告警引擎参数
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub dedup_window: Duration,
    pub correlation_window: Duration,
    /// 每个级别每小时的单独通知上限
    pub max_alerts_per_hour: usize,
    /// 影响范围的跳数
    pub blast_radius_hops: usize,
    pub history_limit: usize,
    pub notify_on_resolve: bool,
    /// 告警附带的处理步骤和升级路径
    pub runbook: Runbook,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(300),
            correlation_window: Duration::from_secs(300),
            max_alerts_per_hour: 100,
            blast_radius_hops: 2,
            history_limit: 1000,
            notify_on_resolve: true,
            runbook: Runbook::default(),
        }
    }
}

/// 持久化的引擎状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub open: Vec<Alert>,
    pub history: Vec<Alert>,
    #[serde(default)]
    pub recent_raises: Vec<RecentRaise>,
}

/// 去重窗口内已发出的 Raised 通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRaise {
    pub device_id: String,
    pub signature: ConditionSignature,
    pub alert_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct DeviceAlerts {
    open: HashMap<ConditionSignature, Alert>,
    /// 条件签名 -> 最近一次单独通知的告警ID，去重窗口结束后过期
    raised: TtlMap<ConditionSignature, String>,
}

struct Shared {
    correlator: Correlator,
    rate: RateCap,
    history: AlertHistory,
    /// 未恢复告警ID -> (设备, 签名)
    index: HashMap<String, (String, ConditionSignature)>,
}

struct Breach {
    device_id: String,
    signature: ConditionSignature,
    severity: Severity,
    message: String,
    value: Option<f64>,
    threshold: Option<f64>,
    at: DateTime<Utc>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}

/// 告警引擎
///
/// 每台设备的告警状态由独立的锁保护；关联组、每小时上限和历史记录共享一把锁，
/// 加锁顺序固定为先设备后共享状态。事件时间取自样本时间戳。
pub struct AlertEngine {
    settings: AlertSettings,
    dedup_window: chrono::Duration,
    inventory: Arc<DeviceInventory>,
    topology: TopologyView,
    services: Vec<BusinessService>,
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceAlerts>>>>,
    shared: Mutex<Shared>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl AlertEngine {
    pub fn new(
        settings: AlertSettings,
        inventory: Arc<DeviceInventory>,
        topology: TopologyView,
        mut services: Vec<BusinessService>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        services.sort_by_key(|s| s.priority);
        let shared = Shared {
            correlator: Correlator::new(to_chrono(settings.correlation_window)),
            rate: RateCap::new(settings.max_alerts_per_hour),
            history: AlertHistory::new(settings.history_limit),
            index: HashMap::new(),
        };
        Self {
            dedup_window: to_chrono(settings.dedup_window),
            settings,
            inventory,
            topology,
            services,
            devices: RwLock::new(HashMap::new()),
            shared: Mutex::new(shared),
            notifications,
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    /// 对一个新样本做阈值判定
    ///
    /// 非有限值（NaN、无穷大）属于数据错误，直接丢弃，不影响已有告警。
    pub async fn evaluate(&self, sample: &MetricSample) {
        if !sample.value.is_finite() {
            warn!(
                device_id = %sample.device_id,
                metric = %sample.metric,
                value = %sample.value,
                "Non-finite sample discarded"
            );
            counter!("netmon_samples_discarded_total", 1);
            return;
        }
        let Some(device) = self.inventory.get(&sample.device_id).await else {
            warn!(device_id = %sample.device_id, "Sample for unknown device, skipping evaluation");
            return;
        };
        let Some(threshold) = device.threshold(&sample.metric).copied() else {
            debug!(
                device_id = %sample.device_id,
                metric = %sample.metric,
                "No threshold configured, skipping evaluation"
            );
            return;
        };

        let signature = ConditionSignature::metric(&sample.metric);
        match threshold.classify(sample.value) {
            Some(severity) => {
                let level = threshold.level(severity);
                let message = match level {
                    Some(level) => format!(
                        "{} is {:.2}, {} threshold {}",
                        sample.metric, sample.value, severity, level
                    ),
                    None => format!("{} is {:.2}", sample.metric, sample.value),
                };
                self.breach(Breach {
                    device_id: sample.device_id.clone(),
                    signature,
                    severity,
                    message,
                    value: Some(sample.value),
                    threshold: level,
                    at: sample.timestamp,
                })
                .await;
            }
            None => {
                self.clear(&sample.device_id, &signature, sample.timestamp, None)
                    .await;
            }
        }
    }

    pub async fn evaluate_batch(&self, samples: &[MetricSample]) {
        for sample in samples {
            self.evaluate(sample).await;
        }
    }

    /// 设备重试耗尽后不可达
    pub async fn device_unreachable(&self, device_id: &str, reason: &str, at: DateTime<Utc>) {
        self.breach(Breach {
            device_id: device_id.to_string(),
            signature: ConditionSignature::device_unreachable(),
            severity: Severity::Critical,
            message: format!("device {} is unreachable: {}", device_id, reason),
            value: None,
            threshold: None,
            at,
        })
        .await;
    }

    /// 设备恢复可达
    pub async fn device_recovered(&self, device_id: &str, at: DateTime<Utc>) {
        self.clear(
            device_id,
            &ConditionSignature::device_unreachable(),
            at,
            Some("device reachable again".to_string()),
        )
        .await;
    }

    /// 链路断开
    pub async fn link_down(&self, device_id: &str, peer: &str, at: DateTime<Utc>) {
        self.breach(Breach {
            device_id: device_id.to_string(),
            signature: ConditionSignature::link_down(peer),
            severity: Severity::Warning,
            message: format!("link between {} and {} is no longer observed", device_id, peer),
            value: None,
            threshold: None,
            at,
        })
        .await;
    }

    /// 链路恢复
    pub async fn link_restored(&self, device_id: &str, peer: &str, at: DateTime<Utc>) {
        self.clear(
            device_id,
            &ConditionSignature::link_down(peer),
            at,
            Some("link observed again".to_string()),
        )
        .await;
    }

    /// 一次性事件：以 Info 级别产生并立即恢复，仍然经过去重和每小时上限
    pub async fn event(&self, device_id: &str, signature: ConditionSignature, message: String, at: DateTime<Utc>) {
        let state = self.device_state(device_id).await;
        let mut device = state.lock().await;
        let mut outbox = Vec::new();

        let mut alert = Alert::new(device_id, signature.clone(), Severity::Info, message, at, self.dedup_window);
        alert.affected_services = self.service_names(device_id);
        self.attach_runbook(&mut alert).await;

        let mut shared = self.shared.lock().await;
        if device.raised.contains(&signature, at) {
            alert.state = AlertState::Suppressed;
            alert.delivery = Delivery::Withheld;
            debug!(device_id, signature = %signature, "Event suppressed within dedup window");
        } else {
            alert.state = AlertState::Active;
            if self.deliver(&mut shared, &mut alert, Transition::Raised, 0, at, &mut outbox) {
                device
                    .raised
                    .insert(signature, alert.id.clone(), at + self.dedup_window);
            }
        }
        counter!("netmon_alerts_raised_total", 1, "severity" => Severity::Info.as_str());
        alert.close(at, Some("event".to_string()));
        shared.history.push(alert);
        drop(shared);
        drop(device);
        self.send_all(outbox);
    }

    /// 确认告警
    pub async fn acknowledge(&self, alert_id: &str, user: &str) -> Result<Alert> {
        let (device_id, signature) = self.locate(alert_id).await?;
        let state = self.device_state(&device_id).await;
        let mut device = state.lock().await;
        let alert = device
            .open
            .get_mut(&signature)
            .filter(|a| a.id == alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

        if alert.state == AlertState::New {
            return Err(AlertError::InvalidTransition {
                id: alert_id.to_string(),
                action: "acknowledged",
                state: alert.state,
            });
        }

        let now = Utc::now();
        alert.state = AlertState::Acknowledged;
        alert.acknowledged_by = Some(user.to_string());
        alert.acknowledged_at = Some(now);
        alert.updated_at = alert.updated_at.max(now);

        let mut shared = self.shared.lock().await;
        shared.correlator.update_member(alert, now);
        info!(alert_id, device_id = %device_id, user, "Alert acknowledged");
        Ok(alert.clone())
    }

    /// 手动恢复告警
    pub async fn resolve(&self, alert_id: &str, notes: &str) -> Result<Alert> {
        let (device_id, signature) = self.locate(alert_id).await?;
        let resolved = self
            .clear(&device_id, &signature, Utc::now(), Some(notes.to_string()))
            .await;
        resolved
            .filter(|a| a.id == alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))
    }

    /// 所有未恢复告警，严重程度高的在前
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts = self.open_alerts().await;
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        alerts
    }

    /// 创建时间在 `[from, to]` 内的告警（含未恢复的）
    pub async fn alert_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .open_alerts()
            .await
            .into_iter()
            .filter(|a| a.created_at >= from && a.created_at <= to)
            .collect();
        alerts.extend(self.shared.lock().await.history.between(from, to));
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// 周期维护：关闭到期关联组、释放到期的整点摘要、回收过期去重记录
    ///
    /// 返回发出的摘要数。
    pub async fn housekeeping(&self, now: DateTime<Utc>) -> usize {
        let mut outbox = Vec::new();
        {
            let mut shared = self.shared.lock().await;
            for group in shared.correlator.sweep(now) {
                debug!(group_id = %group.id, members = group.members.len(), "Correlation group closed");
                if let Some(digest) = group.digest(now) {
                    outbox.push(Notification::Digest(digest));
                }
            }
            for digest in shared.rate.flush_due(now) {
                outbox.push(Notification::Digest(digest));
            }
        }

        let devices: Vec<Arc<Mutex<DeviceAlerts>>> =
            self.devices.read().await.values().cloned().collect();
        for state in devices {
            state.lock().await.raised.sweep(now);
        }

        let digests = outbox.len();
        self.send_all(outbox);
        digests
    }

    /// 退出前冲刷：关闭全部关联组并发出所有待发摘要
    pub async fn flush(&self, now: DateTime<Utc>) -> usize {
        let mut outbox = Vec::new();
        {
            let mut shared = self.shared.lock().await;
            for group in shared.correlator.close_all(now) {
                if let Some(digest) = group.digest(now) {
                    outbox.push(Notification::Digest(digest));
                }
            }
            for digest in shared.rate.flush_all(now) {
                outbox.push(Notification::Digest(digest));
            }
        }
        let digests = outbox.len();
        if digests > 0 {
            info!(digests, "Flushed pending digests");
        }
        self.send_all(outbox);
        digests
    }

    /// 导出可持久化的状态
    pub async fn snapshot(&self) -> EngineSnapshot {
        let now = Utc::now();
        let mut snapshot = EngineSnapshot::default();
        let devices: Vec<(String, Arc<Mutex<DeviceAlerts>>)> = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        for (device_id, state) in devices {
            let device = state.lock().await;
            snapshot.open.extend(device.open.values().cloned());
            for (signature, alert_id) in device.raised.live(now) {
                if let Some(expires_at) = device.raised.expires_at(signature) {
                    snapshot.recent_raises.push(RecentRaise {
                        device_id: device_id.clone(),
                        signature: signature.clone(),
                        alert_id: alert_id.clone(),
                        expires_at,
                    });
                }
            }
        }
        snapshot.open.sort_by_key(|a| a.created_at);
        snapshot.history = self.shared.lock().await.history.all();
        snapshot
    }

    /// 从持久化状态恢复；恢复的告警不再属于任何关联组
    pub async fn restore(&self, snapshot: EngineSnapshot) {
        let now = Utc::now();
        let open = snapshot.open.len();

        for mut alert in snapshot.open.into_iter().filter(|a| a.is_open()) {
            alert.correlation_key = None;
            let state = self.device_state(&alert.device_id).await;
            let mut device = state.lock().await;
            self.shared
                .lock()
                .await
                .index
                .insert(alert.id.clone(), (alert.device_id.clone(), alert.signature.clone()));
            device.open.insert(alert.signature.clone(), alert);
        }

        for raise in snapshot.recent_raises {
            if raise.expires_at <= now {
                continue;
            }
            let state = self.device_state(&raise.device_id).await;
            state
                .lock()
                .await
                .raised
                .insert(raise.signature, raise.alert_id, raise.expires_at);
        }

        let mut shared = self.shared.lock().await;
        for alert in snapshot.history {
            shared.history.push(alert);
        }
        info!(open, history = shared.history.len(), "Alert state restored");
    }

    async fn open_alerts(&self) -> Vec<Alert> {
        let devices: Vec<Arc<Mutex<DeviceAlerts>>> =
            self.devices.read().await.values().cloned().collect();
        let mut alerts = Vec::new();
        for state in devices {
            alerts.extend(state.lock().await.open.values().cloned());
        }
        alerts
    }

    async fn locate(&self, alert_id: &str) -> Result<(String, ConditionSignature)> {
        self.shared
            .lock()
            .await
            .index
            .get(alert_id)
            .cloned()
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))
    }

    async fn device_state(&self, device_id: &str) -> Arc<Mutex<DeviceAlerts>> {
        if let Some(state) = self.devices.read().await.get(device_id) {
            return state.clone();
        }
        self.devices
            .write()
            .await
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    async fn attach_runbook(&self, alert: &mut Alert) {
        let device_type = self
            .inventory
            .get(&alert.device_id)
            .await
            .map(|d| d.device_type)
            .unwrap_or_default();
        let runbook = &self.settings.runbook;
        alert.resolution_steps = runbook.resolution_steps(device_type, alert.signature.condition());
        alert.escalation_path = runbook.escalation_path(alert.severity);
    }

    fn service_names(&self, device_id: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.depends_on(device_id))
            .map(|s| s.name.clone())
            .collect()
    }

    async fn context_for(&self, device_id: &str) -> CorrelationContext {
        let topology = self.topology.snapshot().await;
        let mut scope: BTreeSet<String> = topology
            .blast_radius(device_id, self.settings.blast_radius_hops)
            .into_iter()
            .collect();
        scope.insert(device_id.to_string());

        let impacted: Vec<&BusinessService> = self
            .services
            .iter()
            .filter(|s| s.depends_on(device_id))
            .collect();
        CorrelationContext {
            scope,
            services: impacted.iter().map(|s| s.name.clone()).collect(),
            priority: impacted.iter().map(|s| s.priority).min(),
        }
    }

    async fn breach(&self, breach: Breach) {
        let state = self.device_state(&breach.device_id).await;
        let mut device = state.lock().await;
        let mut outbox = Vec::new();

        let within_window = device
            .open
            .get(&breach.signature)
            .map(|existing| breach.at < existing.dedup_expires_at);

        match within_window {
            Some(true) => {
                if let Some(existing) = device.open.get_mut(&breach.signature) {
                    existing.fold(breach.value, breach.message, breach.at);
                    let mut shared = self.shared.lock().await;
                    if breach.severity > existing.severity {
                        existing.escalate(breach.severity, breach.threshold, breach.at);
                        existing.escalation_path = self.settings.runbook.escalation_path(existing.severity);
                        self.escalated(&mut shared, existing, breach.at, &mut outbox);
                    } else {
                        debug!(
                            alert_id = %existing.id,
                            device_id = %existing.device_id,
                            signature = %existing.signature,
                            occurrences = existing.occurrences,
                            "Repeat breach folded into active alert"
                        );
                        shared.correlator.update_member(existing, breach.at);
                    }
                }
                drop(device);
                self.send_all(outbox);
                return;
            }
            Some(false) => {
                if let Some(mut previous) = device.open.remove(&breach.signature) {
                    let mut shared = self.shared.lock().await;
                    debug!(alert_id = %previous.id, "Dedup window elapsed, superseding alert");
                    self.finish(
                        &mut shared,
                        &mut previous,
                        breach.at,
                        Some("superseded by a new occurrence".to_string()),
                        false,
                        &mut outbox,
                    );
                }
            }
            None => {}
        }

        let mut alert = Alert::new(
            breach.device_id.clone(),
            breach.signature.clone(),
            breach.severity,
            breach.message,
            breach.at,
            self.dedup_window,
        )
        .with_reading(breach.value, breach.threshold);
        alert.affected_services = self.service_names(&breach.device_id);
        self.attach_runbook(&mut alert).await;

        let withheld = device.raised.contains(&breach.signature, breach.at);
        let context = if withheld {
            None
        } else {
            Some(self.context_for(&breach.device_id).await)
        };

        let mut shared = self.shared.lock().await;
        match context {
            None => {
                alert.state = AlertState::Suppressed;
                alert.delivery = Delivery::Withheld;
                info!(
                    alert_id = %alert.id,
                    device_id = %alert.device_id,
                    signature = %alert.signature,
                    "Alert raised without notification, condition already notified within dedup window"
                );
            }
            Some(context) => {
                alert.state = AlertState::Active;
                let outcome = shared.correlator.correlate(&alert, &context, breach.at);
                alert.correlation_key = Some(outcome.group_id().to_string());

                if outcome.is_root() {
                    let correlated = shared
                        .correlator
                        .group(outcome.group_id(), breach.at)
                        .map_or(0, |g| g.members.len().saturating_sub(1));
                    if let JoinOutcome::Rerooted { previous_root, .. } = &outcome {
                        info!(
                            alert_id = %alert.id,
                            previous_root = %previous_root,
                            "Alert takes over correlation group root"
                        );
                    }
                    if self.deliver(&mut shared, &mut alert, Transition::Raised, correlated, breach.at, &mut outbox) {
                        device.raised.insert(
                            breach.signature.clone(),
                            alert.id.clone(),
                            alert.created_at + self.dedup_window,
                        );
                    }
                } else {
                    alert.delivery = Delivery::Grouped;
                }
                shared.correlator.update_member(&alert, breach.at);

                info!(
                    alert_id = %alert.id,
                    device_id = %alert.device_id,
                    signature = %alert.signature,
                    severity = %alert.severity,
                    delivery = ?alert.delivery,
                    "Alert raised"
                );
            }
        }

        counter!("netmon_alerts_raised_total", 1, "severity" => alert.severity.as_str());
        shared
            .index
            .insert(alert.id.clone(), (alert.device_id.clone(), alert.signature.clone()));
        device.open.insert(breach.signature, alert);
        drop(shared);
        drop(device);
        self.send_all(outbox);
    }

    async fn clear(
        &self,
        device_id: &str,
        signature: &ConditionSignature,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Option<Alert> {
        let state = self.devices.read().await.get(device_id).cloned()?;
        let mut device = state.lock().await;
        let mut alert = device.open.remove(signature)?;
        let mut outbox = Vec::new();

        let mut shared = self.shared.lock().await;
        self.finish(&mut shared, &mut alert, at, notes, true, &mut outbox);
        info!(
            alert_id = %alert.id,
            device_id,
            signature = %signature,
            "Alert resolved"
        );
        drop(shared);
        drop(device);
        self.send_all(outbox);
        Some(alert)
    }

    /// 关闭告警：可能发出恢复通知，可能关闭关联组并发出摘要
    fn finish(
        &self,
        shared: &mut Shared,
        alert: &mut Alert,
        at: DateTime<Utc>,
        notes: Option<String>,
        notify: bool,
        outbox: &mut Vec<Notification>,
    ) {
        alert.close(at, notes);
        shared.index.remove(&alert.id);

        if notify && self.settings.notify_on_resolve && alert.delivery == Delivery::Sent {
            self.deliver(shared, alert, Transition::Resolved, 0, at, outbox);
        }
        if let Some(group) = shared.correlator.member_resolved(alert, at) {
            debug!(group_id = %group.id, "Last open member resolved, closing correlation group");
            if let Some(digest) = group.digest(at) {
                outbox.push(Notification::Digest(digest));
            }
        }
        shared.history.push(alert.clone());
    }

    /// 告警升级后的通知决策
    ///
    /// 根告警和独立告警升级时单独通知；普通成员只有在抬高了组的级别时才单独通知，
    /// 否则留在组摘要中。
    fn escalated(&self, shared: &mut Shared, alert: &mut Alert, at: DateTime<Utc>, outbox: &mut Vec<Notification>) {
        let notify = match shared.correlator.update_member(alert, at) {
            Some((before, group)) => group.root_alert_id == alert.id || alert.severity > before,
            None => true,
        };
        info!(
            alert_id = %alert.id,
            device_id = %alert.device_id,
            severity = %alert.severity,
            level = alert.escalation_level,
            notify,
            "Alert escalated"
        );
        if notify {
            self.deliver(shared, alert, Transition::Escalated, 0, at, outbox);
            shared.correlator.update_member(alert, at);
        }
    }

    /// 受每小时上限约束的单独通知；超限则推迟到整点摘要
    ///
    /// 返回是否立即发出。
    fn deliver(
        &self,
        shared: &mut Shared,
        alert: &mut Alert,
        transition: Transition,
        correlated: usize,
        at: DateTime<Utc>,
        outbox: &mut Vec<Notification>,
    ) -> bool {
        let admitted = shared.rate.admit(alert.severity, at);
        if transition != Transition::Resolved {
            alert.delivery = if admitted {
                Delivery::Sent
            } else {
                Delivery::Deferred
            };
        }
        if admitted {
            outbox.push(Notification::Alert {
                alert: alert.clone(),
                transition,
                correlated,
            });
        } else {
            shared.rate.defer(
                alert.severity,
                DigestEntry {
                    alert: alert.clone(),
                    transition,
                },
                at,
            );
        }
        admitted
    }

    fn send_all(&self, outbox: Vec<Notification>) {
        for notification in outbox {
            if self.notifications.send(notification).is_err() {
                warn!("Notification queue closed, notification not dispatched");
            }
        }
    }
}

#[async_trait]
impl TopologyListener for AlertEngine {
    async fn on_topology_changed(&self, snapshot: Arc<TopologySnapshot>, diff: &TopologyDiff) {
        let at = snapshot.generated_at();
        let initial = snapshot.version() <= 1;

        let lost: BTreeSet<(String, String)> = diff
            .removed
            .iter()
            .filter(|e| !snapshot.neighbors(&e.key.a).contains(&e.key.b))
            .map(|e| (e.key.a.clone(), e.key.b.clone()))
            .collect();

        // 只有当两台设备之间的所有链路都是本周期新发现的，才算新邻接
        let gained: BTreeSet<(String, String)> = diff
            .added
            .iter()
            .filter(|added| {
                snapshot
                    .edges()
                    .filter(|e| e.key.a == added.key.a && e.key.b == added.key.b)
                    .all(|e| e.discovered_at == at)
            })
            .map(|e| (e.key.a.clone(), e.key.b.clone()))
            .collect();

        for (a, b) in &lost {
            self.link_down(a, b, at).await;
            self.link_down(b, a, at).await;
        }
        for (a, b) in &gained {
            self.link_restored(a, b, at).await;
            self.link_restored(b, a, at).await;
            if !initial {
                self.event(
                    a,
                    ConditionSignature::link_up(b),
                    format!("new link discovered between {} and {}", a, b),
                    at,
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use netmon_types::{Device, DeviceType, Threshold};

    async fn engine_with(
        settings: AlertSettings,
        devices: Vec<Device>,
        services: Vec<BusinessService>,
    ) -> (AlertEngine, mpsc::UnboundedReceiver<Notification>) {
        let inventory = Arc::new(DeviceInventory::from_devices(devices).await.unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = AlertEngine::new(settings, inventory, TopologyView::new(), services, tx);
        (engine, rx)
    }

    fn router(id: &str) -> Device {
        Device::new(id, "10.0.0.1".parse().unwrap())
            .with_threshold("cpu_usage", Threshold::above(80.0, 90.0))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn test_breach_raises_and_notifies() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0))
            .await;

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
        assert_eq!(active[0].state, AlertState::Active);
        assert_eq!(active[0].threshold, Some(90.0));

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            Notification::Alert { transition: Transition::Raised, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_threshold_is_skipped() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        engine
            .evaluate(&MetricSample::new("r1", "uptime_seconds", 1.0))
            .await;
        engine
            .evaluate(&MetricSample::new("ghost", "cpu_usage", 99.0))
            .await;
        assert!(engine.active_alerts().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_escalation_keeps_single_alert() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 85.0).at(t0)).await;
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0 + ChronoDuration::seconds(30)))
            .await;

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
        assert_eq!(active[0].escalation_level, 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[1],
            Notification::Alert { transition: Transition::Escalated, .. }
        ));
    }

    #[tokio::test]
    async fn test_return_to_normal_resolves() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0)).await;
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 20.0).at(t0 + ChronoDuration::seconds(60)))
            .await;

        assert!(engine.active_alerts().await.is_empty());
        let history = engine
            .alert_history(t0 - ChronoDuration::seconds(1), t0 + ChronoDuration::seconds(1))
            .await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, AlertState::Resolved);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[1],
            Notification::Alert { transition: Transition::Resolved, .. }
        ));
    }

    #[tokio::test]
    async fn test_non_finite_sample_leaves_alert_open() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0)).await;
        let nan: f64 = "NaN".parse().unwrap();
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", nan).at(t0 + ChronoDuration::seconds(10)))
            .await;

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            Notification::Alert { transition: Transition::Raised, .. }
        ));
    }

    #[tokio::test]
    async fn test_infinite_sample_raises_nothing() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;

        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", f64::INFINITY))
            .await;
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", f64::NEG_INFINITY))
            .await;

        assert!(engine.active_alerts().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_flapping_condition_notified_once_per_window() {
        let settings = AlertSettings {
            dedup_window: Duration::from_secs(60),
            ..Default::default()
        };
        let (engine, mut rx) = engine_with(settings, vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0)).await;
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 10.0).at(t0 + ChronoDuration::seconds(10)))
            .await;
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0 + ChronoDuration::seconds(20)))
            .await;

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].state, AlertState::Suppressed);

        let raises = drain(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::Alert { transition: Transition::Raised, .. }))
            .count();
        assert_eq!(raises, 1);
    }

    #[tokio::test]
    async fn test_expired_window_raises_new_alert() {
        let settings = AlertSettings {
            dedup_window: Duration::from_secs(60),
            ..Default::default()
        };
        let (engine, mut rx) = engine_with(settings, vec![router("r1")], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0)).await;
        let first = engine.active_alerts().await[0].id.clone();
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0 + ChronoDuration::seconds(61)))
            .await;

        let active = engine.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, first);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_and_manual_resolve() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 85.0)).await;
        let id = engine.active_alerts().await[0].id.clone();

        let acked = engine.acknowledge(&id, "noc-oncall").await.unwrap();
        assert_eq!(acked.state, AlertState::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("noc-oncall"));

        let resolved = engine.resolve(&id, "fan replaced").await.unwrap();
        assert_eq!(resolved.state, AlertState::Resolved);
        assert_eq!(resolved.resolution_notes.as_deref(), Some("fan replaced"));

        assert!(matches!(engine.resolve(&id, "again").await, Err(AlertError::NotFound(_))));
        assert!(matches!(engine.acknowledge("missing", "x").await, Err(AlertError::NotFound(_))));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_and_recovery() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let t0 = Utc::now();
        engine.device_unreachable("r1", "3 attempts timed out", t0).await;

        let active = engine.active_alerts().await;
        assert_eq!(active[0].signature, ConditionSignature::device_unreachable());
        assert_eq!(active[0].severity, Severity::Critical);

        engine.device_recovered("r1", t0 + ChronoDuration::seconds(30)).await;
        assert!(engine.active_alerts().await.is_empty());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_affected_services_recorded() {
        let services = vec![
            BusinessService::new("voip", 3).with_devices(["r1"]),
            BusinessService::new("payments", 1).with_devices(["r1", "r2"]),
        ];
        let (engine, _rx) = engine_with(AlertSettings::default(), vec![router("r1")], services).await;
        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0)).await;

        let alert = &engine.active_alerts().await[0];
        assert_eq!(alert.affected_services, vec!["payments", "voip"]);
    }

    #[tokio::test]
    async fn test_runbook_attached_at_raise_and_escalation() {
        let mut runbook = Runbook::default();
        runbook.resolution_steps.insert(
            "router_cpu_usage".to_string(),
            vec!["Check for routing loops".to_string()],
        );
        runbook
            .escalation_paths
            .insert("warning".to_string(), vec!["NOC".to_string()]);
        runbook.escalation_paths.insert(
            "critical".to_string(),
            vec!["NOC".to_string(), "Network On-call".to_string()],
        );
        let settings = AlertSettings {
            runbook,
            ..Default::default()
        };
        let device = router("r1").with_device_type(DeviceType::Router);
        let (engine, _rx) = engine_with(settings, vec![device], vec![]).await;
        let t0 = Utc::now();

        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 85.0).at(t0)).await;
        let alert = &engine.active_alerts().await[0];
        assert_eq!(alert.resolution_steps, vec!["Check for routing loops"]);
        assert_eq!(alert.escalation_path, vec!["NOC"]);

        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(t0 + ChronoDuration::seconds(30)))
            .await;
        let alert = &engine.active_alerts().await[0];
        assert_eq!(alert.escalation_path, vec!["NOC", "Network On-call"]);

        // 未配置的条件使用默认处理步骤
        engine.device_unreachable("r1", "timed out", t0).await;
        let unreachable = engine
            .active_alerts()
            .await
            .into_iter()
            .find(|a| a.signature == ConditionSignature::device_unreachable())
            .unwrap();
        assert_eq!(unreachable.resolution_steps.len(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_restore_keeps_dedup() {
        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        let now = Utc::now();
        engine.evaluate(&MetricSample::new("r1", "cpu_usage", 95.0).at(now)).await;
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.open.len(), 1);
        assert_eq!(snapshot.recent_raises.len(), 1);
        drain(&mut rx);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: EngineSnapshot = serde_json::from_str(&json).unwrap();

        let (engine, mut rx) = engine_with(AlertSettings::default(), vec![router("r1")], vec![]).await;
        engine.restore(restored).await;
        assert_eq!(engine.active_alerts().await.len(), 1);

        // 去重窗口内的重复越限仍被折叠
        engine
            .evaluate(&MetricSample::new("r1", "cpu_usage", 96.0).at(now + ChronoDuration::seconds(5)))
            .await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.active_alerts().await[0].occurrences, 2);
    }
}
