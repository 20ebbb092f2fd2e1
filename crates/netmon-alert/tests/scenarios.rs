use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use netmon_alert::{
    AlertEngine, AlertSettings, AlertState, ConditionSignature, DigestKind, Notification, Transition,
};
use netmon_device::DeviceInventory;
use netmon_topology::{
    apply_round, DiscoveryRound, EdgeKey, LinkType, TopologyListener, TopologySnapshot, TopologyView,
};
use netmon_types::{BusinessService, Comparison, Device, MetricSample, Severity, Threshold};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, h, m, s).unwrap()
}

fn device(id: &str, n: u32) -> Device {
    Device::new(id, format!("10.{}.{}.{}", n / 65536 % 256, n / 256 % 256, n % 256 + 1).parse().unwrap())
        .with_threshold("cpu_usage", Threshold::above(80.0, 90.0))
        .with_threshold(
            "if_oper_status",
            Threshold {
                warning: Some(0.5),
                critical: None,
                comparison: Comparison::Below,
            },
        )
}

async fn engine(
    settings: AlertSettings,
    devices: Vec<Device>,
    topology: TopologyView,
    services: Vec<BusinessService>,
) -> (Arc<AlertEngine>, mpsc::UnboundedReceiver<Notification>) {
    let inventory = Arc::new(DeviceInventory::from_devices(devices).await.unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = AlertEngine::new(settings, inventory, topology, services, tx);
    (Arc::new(engine), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn star_topology(center: &str, leaves: &[&str], now: DateTime<Utc>) -> TopologySnapshot {
    let mut round = DiscoveryRound::new();
    round.observe(center);
    for leaf in leaves {
        round.add(EdgeKey::new(center, *leaf, LinkType::Bridge));
    }
    apply_round(&TopologySnapshot::empty(), &round, now, 2).0
}

/// 去重窗口 60s 内两次 Warning 越限：只通知一次，告警保持 ACTIVE，更新时间为第二次越限
#[tokio::test]
async fn test_repeat_warning_within_dedup_window() {
    let settings = AlertSettings {
        dedup_window: Duration::from_secs(60),
        ..Default::default()
    };
    let (engine, mut rx) = engine(settings, vec![device("edge-1", 1)], TopologyView::new(), vec![]).await;
    let t0 = at(9, 0, 0);

    engine
        .evaluate(&MetricSample::new("edge-1", "cpu_usage", 85.0).at(t0))
        .await;
    engine
        .evaluate(&MetricSample::new("edge-1", "cpu_usage", 86.0).at(t0 + ChronoDuration::seconds(10)))
        .await;

    let notifications = drain(&mut rx);
    assert_eq!(notifications.len(), 1);

    let active = engine.active_alerts().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].state, AlertState::Active);
    assert_eq!(active[0].severity, Severity::Warning);
    assert_eq!(active[0].occurrences, 2);
    assert_eq!(active[0].updated_at, t0 + ChronoDuration::seconds(10));
}

/// 核心设备不可达，三台相邻设备接口中断：一条根告警通知 + 一条 3 成员摘要
#[tokio::test]
async fn test_outage_correlated_under_root() {
    let t0 = at(9, 0, 0);
    let topology = TopologyView::from_snapshot(star_topology("core", &["acc1", "acc2", "acc3"], t0));
    let services = vec![BusinessService::new("core-banking", 1).with_devices(["core"])];
    let devices = vec![
        device("core", 1),
        device("acc1", 2),
        device("acc2", 3),
        device("acc3", 4),
    ];
    let settings = AlertSettings {
        correlation_window: Duration::from_secs(300),
        ..Default::default()
    };
    let (engine, mut rx) = engine(settings, devices, topology, services).await;

    engine.device_unreachable("core", "no response to ping", t0).await;
    for (i, leaf) in ["acc1", "acc2", "acc3"].iter().enumerate() {
        engine
            .evaluate(
                &MetricSample::new(*leaf, "if_oper_status", 0.0)
                    .at(t0 + ChronoDuration::seconds(1 + i as i64 * 2)),
            )
            .await;
    }

    // 窗口内只有根告警被单独通知
    let early = drain(&mut rx);
    assert_eq!(early.len(), 1);
    match &early[0] {
        Notification::Alert {
            alert, transition, ..
        } => {
            assert_eq!(alert.device_id, "core");
            assert_eq!(*transition, Transition::Raised);
            assert_eq!(alert.affected_services, vec!["core-banking"]);
        }
        other => panic!("expected root alert, got {:?}", other),
    }

    assert_eq!(engine.housekeeping(t0 + ChronoDuration::seconds(299)).await, 0);
    assert_eq!(engine.housekeeping(t0 + ChronoDuration::seconds(300)).await, 1);

    let late = drain(&mut rx);
    assert_eq!(late.len(), 1);
    match &late[0] {
        Notification::Digest(digest) => {
            assert_eq!(digest.len(), 3);
            assert!(matches!(digest.kind, DigestKind::Correlation { .. }));
            let first = digest.entries.iter().map(|e| e.alert.created_at).min().unwrap();
            let last = digest.entries.iter().map(|e| e.alert.created_at).max().unwrap();
            assert!(last - first <= ChronoDuration::seconds(300));
        }
        other => panic!("expected digest, got {:?}", other),
    }

    // 所有告警仍然有效，共享同一个关联键
    let active = engine.active_alerts().await;
    assert_eq!(active.len(), 4);
    let key = active[0].correlation_key.clone();
    assert!(key.is_some());
    assert!(active.iter().all(|a| a.correlation_key == key));
}

/// 一小时内 150 条 Critical，上限 100：100 条单独通知 + 整点一条 50 条的摘要
#[tokio::test]
async fn test_hourly_cap_defers_into_digest() {
    let settings = AlertSettings {
        max_alerts_per_hour: 100,
        ..Default::default()
    };
    let devices: Vec<Device> = (0..150).map(|i| device(&format!("dev-{:03}", i), i)).collect();
    let (engine, mut rx) = engine(settings, devices, TopologyView::new(), vec![]).await;
    let t0 = at(10, 0, 0);

    for i in 0..150 {
        engine
            .evaluate(
                &MetricSample::new(format!("dev-{:03}", i), "cpu_usage", 99.0)
                    .at(t0 + ChronoDuration::seconds(i * 20)),
            )
            .await;
    }

    let individual = drain(&mut rx);
    assert_eq!(individual.len(), 100);
    assert!(individual.iter().all(|n| !n.is_digest()));

    // 整点前不释放
    engine.housekeeping(at(10, 59, 59)).await;
    assert!(drain(&mut rx).is_empty());

    engine.housekeeping(at(11, 0, 0)).await;
    let digests = drain(&mut rx);
    assert_eq!(digests.len(), 1);
    match &digests[0] {
        Notification::Digest(digest) => {
            assert_eq!(digest.kind, DigestKind::RateLimited);
            assert_eq!(digest.severity, Severity::Critical);
            assert_eq!(digest.len(), 50);
        }
        other => panic!("expected digest, got {:?}", other),
    }

    // 超限的告警仍然被记录
    assert_eq!(engine.active_alerts().await.len(), 150);
}

/// 关闭前冲刷会立即发出待发摘要
#[tokio::test]
async fn test_flush_releases_pending_digests() {
    let settings = AlertSettings {
        max_alerts_per_hour: 1,
        ..Default::default()
    };
    let devices = vec![device("a", 1), device("b", 2)];
    let (engine, mut rx) = engine(settings, devices, TopologyView::new(), vec![]).await;
    let t0 = at(10, 0, 0);

    engine.evaluate(&MetricSample::new("a", "cpu_usage", 99.0).at(t0)).await;
    engine.evaluate(&MetricSample::new("b", "cpu_usage", 99.0).at(t0)).await;
    assert_eq!(drain(&mut rx).len(), 1);

    assert_eq!(engine.flush(t0 + ChronoDuration::seconds(5)).await, 1);
    assert!(drain(&mut rx)[0].is_digest());
}

/// 链路消失产生 link_down 告警，重新发现后恢复
#[tokio::test]
async fn test_link_down_and_restore_from_topology() {
    let t0 = at(12, 0, 0);
    let view = TopologyView::new();
    let devices = vec![device("sw1", 1), device("sw2", 2)];
    let (engine, mut rx) = engine(AlertSettings::default(), devices, view.clone(), vec![]).await;

    let mut with_link = DiscoveryRound::new();
    with_link.observe("sw1");
    with_link.add(EdgeKey::new("sw1", "sw2", LinkType::Arp));
    let mut without_link = DiscoveryRound::new();
    without_link.observe("sw1");

    // 首次发现不产生事件
    let (first, diff) = apply_round(&*view.snapshot().await, &with_link, t0, 0);
    let first = view.publish(first).await;
    engine.on_topology_changed(first.clone(), &diff).await;
    assert!(drain(&mut rx).is_empty());

    let (second, diff) = apply_round(&first, &without_link, t0 + ChronoDuration::minutes(15), 0);
    let second = view.publish(second).await;
    engine.on_topology_changed(second.clone(), &diff).await;

    let active = engine.active_alerts().await;
    assert_eq!(active.len(), 2);
    assert!(active
        .iter()
        .any(|a| a.device_id == "sw1" && a.signature == ConditionSignature::link_down("sw2")));
    assert!(active.iter().all(|a| a.severity == Severity::Warning));
    drain(&mut rx);

    let (third, diff) = apply_round(&second, &with_link, t0 + ChronoDuration::minutes(30), 0);
    let third = view.publish(third).await;
    engine.on_topology_changed(third, &diff).await;

    assert!(engine.active_alerts().await.is_empty());
    let notifications = drain(&mut rx);
    // link_up 事件作为 Info 通知发出
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::Alert { alert, transition: Transition::Raised, .. }
            if alert.severity == Severity::Info && alert.signature == ConditionSignature::link_up("sw2")
    )));
}
