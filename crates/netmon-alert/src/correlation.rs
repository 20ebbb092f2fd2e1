use crate::model::{Alert, Delivery};
use crate::notification::{Digest, DigestEntry, DigestKind, Transition};
use chrono::{DateTime, Duration, Utc};
use netmon_core::{ExpiringStore, TtlMap};
use netmon_types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// 关联组
///
/// 组的活动窗口从第一个成员创建时开始，固定为关联窗口长度，不因新成员加入而延长。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub id: String,
    pub root_alert_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub severity: Severity,
    pub devices: BTreeSet<String>,
    pub services: BTreeSet<String>,
    /// 组内最高的业务服务优先级（数值越小越高）
    pub best_priority: Option<u8>,
    /// 成员快照，按加入顺序
    pub members: Vec<Alert>,
}

impl CorrelationGroup {
    pub fn open_members(&self) -> usize {
        self.members.iter().filter(|m| m.is_open()).count()
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id.as_str()).collect()
    }

    fn matches(&self, context: &CorrelationContext) -> bool {
        !self.services.is_disjoint(&context.services) || !self.devices.is_disjoint(&context.scope)
    }

    fn outranked_by(&self, priority: Option<u8>) -> bool {
        match (priority, self.best_priority) {
            (Some(p), Some(best)) => p < best,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn refresh_severity(&mut self) {
        self.severity = self
            .members
            .iter()
            .map(|m| m.severity)
            .max()
            .unwrap_or(Severity::Info);
    }

    /// 组关闭时的摘要：只包含未单独通知的成员
    pub fn digest(&self, at: DateTime<Utc>) -> Option<Digest> {
        let entries: Vec<DigestEntry> = self
            .members
            .iter()
            .filter(|m| m.delivery == Delivery::Grouped)
            .map(|m| DigestEntry {
                alert: m.clone(),
                transition: if m.is_open() {
                    Transition::Raised
                } else {
                    Transition::Resolved
                },
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        let severity = entries
            .iter()
            .map(|e| e.alert.severity)
            .max()
            .unwrap_or(self.severity);
        Some(Digest::new(
            DigestKind::Correlation {
                group_id: self.id.clone(),
                root_alert_id: self.root_alert_id.clone(),
            },
            severity,
            entries,
            at,
        ))
    }
}

/// 告警的关联上下文
#[derive(Debug, Clone, Default)]
pub struct CorrelationContext {
    /// 告警设备及其影响范围内的设备
    pub scope: BTreeSet<String>,
    /// 依赖该设备的业务服务
    pub services: BTreeSet<String>,
    /// 这些服务中的最高优先级
    pub priority: Option<u8>,
}

/// 关联结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// 新开一个组，告警为根
    Opened { group_id: String },
    /// 作为普通成员加入
    Joined { group_id: String, root_alert_id: String },
    /// 加入并取代原来的根（业务优先级更高）
    Rerooted { group_id: String, previous_root: String },
}

impl JoinOutcome {
    pub fn group_id(&self) -> &str {
        match self {
            JoinOutcome::Opened { group_id }
            | JoinOutcome::Joined { group_id, .. }
            | JoinOutcome::Rerooted { group_id, .. } => group_id,
        }
    }

    /// 告警是否以根的身份单独通知
    pub fn is_root(&self) -> bool {
        !matches!(self, JoinOutcome::Joined { .. })
    }
}

/// 关联器
pub struct Correlator {
    groups: TtlMap<String, CorrelationGroup>,
    window: Duration,
}

impl Correlator {
    pub fn new(window: Duration) -> Self {
        Self {
            groups: TtlMap::new(),
            window,
        }
    }

    /// 为新告警寻找或建立关联组，并把告警快照加入组
    ///
    /// 多个组匹配时选择业务优先级最高者，其次是最早打开的。
    pub fn correlate(
        &mut self,
        alert: &Alert,
        context: &CorrelationContext,
        now: DateTime<Utc>,
    ) -> JoinOutcome {
        let chosen = self
            .groups
            .live(now)
            .into_iter()
            .filter(|(_, group)| group.matches(context))
            .min_by_key(|(_, group)| {
                (
                    group.best_priority.map_or(u16::MAX, u16::from),
                    group.opened_at,
                )
            })
            .map(|(id, _)| id.clone());

        let Some(group_id) = chosen else {
            return self.open(alert, context);
        };
        let Some(group) = self.groups.get_mut(&group_id, now) else {
            return self.open(alert, context);
        };

        let rerooted = group.outranked_by(context.priority);
        let previous_root = group.root_alert_id.clone();
        if rerooted {
            group.root_alert_id = alert.id.clone();
            group.best_priority = context.priority;
        }
        group.devices.insert(alert.device_id.clone());
        group.services.extend(context.services.iter().cloned());
        group.members.push(alert.clone());
        group.refresh_severity();

        debug!(
            group_id = %group_id,
            alert_id = %alert.id,
            members = group.members.len(),
            rerooted,
            "Alert joined correlation group"
        );

        if rerooted {
            JoinOutcome::Rerooted {
                group_id,
                previous_root,
            }
        } else {
            JoinOutcome::Joined {
                group_id,
                root_alert_id: previous_root,
            }
        }
    }

    fn open(&mut self, alert: &Alert, context: &CorrelationContext) -> JoinOutcome {
        let group_id = uuid::Uuid::new_v4().to_string();
        let group = CorrelationGroup {
            id: group_id.clone(),
            root_alert_id: alert.id.clone(),
            opened_at: alert.created_at,
            closed_at: None,
            severity: alert.severity,
            devices: BTreeSet::from([alert.device_id.clone()]),
            services: context.services.clone(),
            best_priority: context.priority,
            members: vec![alert.clone()],
        };
        self.groups
            .insert(group_id.clone(), group, alert.created_at + self.window);
        JoinOutcome::Opened { group_id }
    }

    pub fn group(&self, group_id: &str, now: DateTime<Utc>) -> Option<&CorrelationGroup> {
        self.groups.get(&group_id.to_string(), now)
    }

    /// 更新成员快照，返回更新前的组级别
    pub fn update_member(&mut self, alert: &Alert, now: DateTime<Utc>) -> Option<(Severity, &CorrelationGroup)> {
        let group_id = alert.correlation_key.clone()?;
        let group = self.groups.get_mut(&group_id, now)?;
        let before = group.severity;
        if let Some(member) = group.members.iter_mut().find(|m| m.id == alert.id) {
            *member = alert.clone();
        }
        group.refresh_severity();
        Some((before, group))
    }

    /// 成员恢复；若它是组内最后一个未恢复成员则关闭组并返回
    pub fn member_resolved(&mut self, alert: &Alert, now: DateTime<Utc>) -> Option<CorrelationGroup> {
        let group_id = alert.correlation_key.clone()?;
        {
            let group = self.groups.get_mut(&group_id, now)?;
            if let Some(member) = group.members.iter_mut().find(|m| m.id == alert.id) {
                *member = alert.clone();
            }
            if group.open_members() > 0 {
                return None;
            }
        }
        let mut group = self.groups.remove(&group_id)?;
        group.closed_at = Some(now);
        Some(group)
    }

    /// 关闭窗口已过的组
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<CorrelationGroup> {
        let mut closed: Vec<CorrelationGroup> = self
            .groups
            .sweep(now)
            .into_iter()
            .map(|(_, mut group)| {
                group.closed_at = Some(now.min(group.opened_at + self.window));
                group
            })
            .collect();
        closed.sort_by_key(|g| g.opened_at);
        closed
    }

    /// 关闭全部组（退出时调用）
    pub fn close_all(&mut self, now: DateTime<Utc>) -> Vec<CorrelationGroup> {
        let far_future = now + self.window + self.window;
        let mut closed: Vec<CorrelationGroup> = self
            .groups
            .sweep(far_future)
            .into_iter()
            .map(|(_, mut group)| {
                group.closed_at = Some(now);
                group
            })
            .collect();
        closed.sort_by_key(|g| g.opened_at);
        closed
    }

    pub fn live_groups(&self, now: DateTime<Utc>) -> Vec<&CorrelationGroup> {
        self.groups.live(now).into_iter().map(|(_, g)| g).collect()
    }
}
