use crate::diff::{apply_round, DiscoveryRound, TopologyChange, TopologyDiff};
use crate::graph::{EdgeKey, LinkType, TopologySnapshot};
use crate::view::TopologyView;
use async_trait::async_trait;
use chrono::Utc;
use netmon_device::DeviceInventory;
use netmon_protocol::{AdapterRegistry, DiscoveryReport};
use netmon_types::IpNetwork;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 映射器参数
#[derive(Debug, Clone)]
pub struct MapperSettings {
    pub interval: Duration,
    /// 边在被移除前允许连续缺失的周期数
    pub grace_cycles: u32,
    /// 发现范围；为空时不上报未纳管邻居
    pub networks: Vec<IpNetwork>,
    pub discovery_timeout: Duration,
    pub history_limit: usize,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            grace_cycles: 2,
            networks: Vec::new(),
            discovery_timeout: Duration::from_secs(30),
            history_limit: 100,
        }
    }
}

/// 拓扑变化监听器
#[async_trait]
pub trait TopologyListener: Send + Sync {
    async fn on_topology_changed(&self, snapshot: Arc<TopologySnapshot>, diff: &TopologyDiff);
}

/// 拓扑映射器
pub struct TopologyMapper {
    inventory: Arc<DeviceInventory>,
    adapters: Arc<AdapterRegistry>,
    view: TopologyView,
    settings: MapperSettings,
    listeners: Vec<Arc<dyn TopologyListener>>,
    history: RwLock<VecDeque<TopologyChange>>,
    unmanaged: RwLock<BTreeSet<IpAddr>>,
    refresh: Notify,
}

impl TopologyMapper {
    pub fn new(
        inventory: Arc<DeviceInventory>,
        adapters: Arc<AdapterRegistry>,
        view: TopologyView,
        settings: MapperSettings,
    ) -> Self {
        Self {
            inventory,
            adapters,
            view,
            settings,
            listeners: Vec::new(),
            history: RwLock::new(VecDeque::new()),
            unmanaged: RwLock::new(BTreeSet::new()),
            refresh: Notify::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TopologyListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn view(&self) -> TopologyView {
        self.view.clone()
    }

    /// 请求立即执行一次发现
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// 最近的拓扑变更，按时间先后排列
    pub async fn history(&self) -> Vec<TopologyChange> {
        self.history.read().await.iter().cloned().collect()
    }

    /// 上一周期发现的未纳管邻居
    pub async fn unmanaged_neighbors(&self) -> Vec<IpAddr> {
        self.unmanaged.read().await.iter().copied().collect()
    }

    /// 执行一次完整的发现周期并发布新快照
    pub async fn run_cycle(&self) -> TopologyDiff {
        let now = Utc::now();
        let (reports, attempted) = self.collect_reports().await;

        if attempted > 0 && reports.is_empty() {
            warn!(attempted, "Topology discovery failed on every device, keeping previous snapshot");
            return TopologyDiff::default();
        }

        let address_index: HashMap<IpAddr, String> = self
            .inventory
            .list()
            .await
            .into_iter()
            .map(|d| (d.address, d.id))
            .collect();
        let round = build_round(&reports, &address_index, &self.settings.networks);

        let previous = self.view.snapshot().await;
        let (next, diff) = apply_round(&previous, &round, now, self.settings.grace_cycles);
        let snapshot = self.view.publish(next).await;

        if !round.unmanaged.is_empty() {
            info!(
                count = round.unmanaged.len(),
                "Discovered neighbors that are not in the device inventory"
            );
        }
        *self.unmanaged.write().await = round.unmanaged;

        if diff.is_structural_change() {
            info!(
                version = snapshot.version(),
                added = diff.added.len(),
                removed = diff.removed.len(),
                edges = snapshot.edge_count(),
                "Topology changed"
            );
            self.record_change(TopologyChange {
                version: snapshot.version(),
                at: now,
                added: diff.added.clone(),
                removed: diff.removed.clone(),
            })
            .await;
        } else {
            debug!(
                version = snapshot.version(),
                confirmed = diff.confirmed,
                stale = diff.stale,
                "Topology unchanged"
            );
        }

        for listener in &self.listeners {
            listener.on_topology_changed(snapshot.clone(), &diff).await;
        }

        diff
    }

    /// 周期运行，直到收到关闭信号
    pub async fn run<T: Clone>(self: Arc<Self>, mut shutdown: broadcast::Receiver<T>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        info!(interval = ?self.settings.interval, "Topology mapper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = self.refresh.notified() => {
                    info!("Topology refresh requested");
                    self.run_cycle().await;
                    ticker.reset();
                }
                _ = shutdown.recv() => {
                    info!("Topology mapper stopping");
                    break;
                }
            }
        }
    }

    async fn collect_reports(&self) -> (Vec<DiscoveryReport>, usize) {
        let mut tasks = JoinSet::new();
        let timeout = self.settings.discovery_timeout;

        for device in self.inventory.enabled().await {
            let Some(adapter) = self.adapters.select_discovery(&device) else {
                continue;
            };
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, adapter.discover(&device)).await;
                (device.id, result)
            });
        }

        let attempted = tasks.len();
        let mut reports = Vec::with_capacity(attempted);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(report)))) => reports.push(report),
                Ok((device_id, Ok(Err(e)))) => {
                    warn!(device_id = %device_id, error = %e, "Neighbor discovery failed");
                }
                Ok((device_id, Err(_))) => {
                    warn!(device_id = %device_id, timeout = ?timeout, "Neighbor discovery timed out");
                }
                Err(e) => warn!(error = %e, "Discovery task aborted"),
            }
        }
        (reports, attempted)
    }

    async fn record_change(&self, change: TopologyChange) {
        let mut history = self.history.write().await;
        history.push_back(change);
        while history.len() > self.settings.history_limit {
            history.pop_front();
        }
    }
}

/// 由各设备的发现结果构建候选边
///
/// ARP 和路由下一跳按管理地址关联设备；网桥表中的 MAC 通过全部 ARP 结果解析为地址。
pub fn build_round(
    reports: &[DiscoveryReport],
    address_index: &HashMap<IpAddr, String>,
    networks: &[IpNetwork],
) -> DiscoveryRound {
    let mac_to_ip: HashMap<&str, IpAddr> = reports
        .iter()
        .flat_map(|r| r.arp.iter())
        .map(|entry| (entry.mac.as_str(), entry.ip))
        .collect();
    let in_scope = |ip: &IpAddr| networks.iter().any(|n| n.contains(*ip));

    let mut round = DiscoveryRound::new();
    for report in reports {
        let own = report.device_id.as_str();
        round.observe(own);

        let link = |ip: IpAddr, link_type: LinkType, round: &mut DiscoveryRound| {
            match address_index.get(&ip) {
                Some(peer) if peer != own => round.add(EdgeKey::new(own, peer.as_str(), link_type)),
                Some(_) => {}
                None if in_scope(&ip) => {
                    round.unmanaged.insert(ip);
                }
                None => {}
            }
        };

        for entry in &report.arp {
            link(entry.ip, LinkType::Arp, &mut round);
        }
        for hop in &report.route_next_hops {
            link(*hop, LinkType::Route, &mut round);
        }
        for mac in &report.bridge_macs {
            if let Some(ip) = mac_to_ip.get(mac.as_str()) {
                if let Some(peer) = address_index.get(ip) {
                    if peer != own {
                        round.add(EdgeKey::new(own, peer.as_str(), LinkType::Bridge));
                    }
                }
            }
        }
    }
    round
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmon_protocol::{Adapter, AdapterError, ArpEntry};
    use netmon_types::{Device, MetricSample, Protocol};
    use std::sync::Mutex;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn arp(ip_str: &str, mac: &str) -> ArpEntry {
        ArpEntry {
            ip: ip(ip_str),
            mac: mac.to_string(),
        }
    }

    /// 按设备返回预设发现结果的适配器
    struct FakeDiscovery {
        reports: Mutex<HashMap<String, DiscoveryReport>>,
    }

    impl FakeDiscovery {
        fn new() -> Self {
            Self {
                reports: Mutex::new(HashMap::new()),
            }
        }

        fn set(&self, report: DiscoveryReport) {
            self.reports
                .lock()
                .unwrap()
                .insert(report.device_id.clone(), report);
        }

        fn clear(&self, device_id: &str) {
            self.reports.lock().unwrap().remove(device_id);
        }
    }

    #[async_trait]
    impl Adapter for FakeDiscovery {
        fn protocol(&self) -> Protocol {
            Protocol::Snmp
        }

        async fn poll(&self, _device: &Device) -> netmon_protocol::Result<Vec<MetricSample>> {
            Ok(Vec::new())
        }

        fn supports_discovery(&self) -> bool {
            true
        }

        async fn discover(&self, device: &Device) -> netmon_protocol::Result<DiscoveryReport> {
            self.reports
                .lock()
                .unwrap()
                .get(&device.id)
                .cloned()
                .ok_or_else(|| AdapterError::Unreachable(device.id.clone()))
        }
    }

    async fn mapper(adapter: Arc<FakeDiscovery>, grace: u32) -> TopologyMapper {
        let devices = vec![
            Device::new("core", ip("10.0.0.1")).with_protocols(vec![Protocol::Snmp]),
            Device::new("dist", ip("10.0.0.2")).with_protocols(vec![Protocol::Snmp]),
            Device::new("acc", ip("10.0.0.3")).with_protocols(vec![Protocol::Snmp]),
        ];
        let inventory = Arc::new(DeviceInventory::from_devices(devices).await.unwrap());
        let mut registry = AdapterRegistry::new();
        registry.register(adapter);

        TopologyMapper::new(
            inventory,
            Arc::new(registry),
            TopologyView::new(),
            MapperSettings {
                grace_cycles: grace,
                networks: vec!["10.0.0.0/24".parse().unwrap()],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_build_round_links_devices() {
        let index: HashMap<IpAddr, String> = [
            (ip("10.0.0.1"), "core".to_string()),
            (ip("10.0.0.2"), "dist".to_string()),
            (ip("10.0.0.3"), "acc".to_string()),
        ]
        .into_iter()
        .collect();

        let mut core = DiscoveryReport::new("core");
        core.arp = vec![
            arp("10.0.0.2", "00:00:00:00:00:02"),
            arp("10.0.0.50", "00:00:00:00:00:50"),
            arp("192.168.1.1", "00:00:00:00:01:01"),
        ];
        core.route_next_hops = vec![ip("10.0.0.2")];

        let mut dist = DiscoveryReport::new("dist");
        dist.arp = vec![arp("10.0.0.3", "00:00:00:00:00:03")];
        dist.bridge_macs = vec!["00:00:00:00:00:03".to_string(), "ff:ff:ff:ff:ff:ff".to_string()];

        let networks: Vec<IpNetwork> = vec!["10.0.0.0/24".parse().unwrap()];
        let round = build_round(&[core, dist], &index, &networks);

        assert!(round.candidates.contains(&EdgeKey::new("core", "dist", LinkType::Arp)));
        assert!(round.candidates.contains(&EdgeKey::new("core", "dist", LinkType::Route)));
        assert!(round.candidates.contains(&EdgeKey::new("dist", "acc", LinkType::Arp)));
        assert!(round.candidates.contains(&EdgeKey::new("dist", "acc", LinkType::Bridge)));
        assert_eq!(round.candidates.len(), 4);
        // 范围外的地址不上报
        assert_eq!(round.unmanaged.iter().copied().collect::<Vec<_>>(), vec![ip("10.0.0.50")]);
        assert!(round.observed.contains("core") && round.observed.contains("dist"));
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot_and_history() {
        let adapter = Arc::new(FakeDiscovery::new());
        let mut core = DiscoveryReport::new("core");
        core.arp = vec![arp("10.0.0.2", "00:00:00:00:00:02")];
        adapter.set(core);

        let mapper = mapper(adapter.clone(), 0).await;
        let diff = mapper.run_cycle().await;
        assert_eq!(diff.added.len(), 1);

        let view = mapper.view();
        assert_eq!(view.version().await, 1);
        assert_eq!(view.snapshot().await.neighbors("core"), vec!["dist"]);

        // 相同输入不产生新版本
        let diff = mapper.run_cycle().await;
        assert!(!diff.is_structural_change());
        assert_eq!(view.version().await, 1);
        assert_eq!(mapper.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_total_discovery_failure_keeps_snapshot() {
        let adapter = Arc::new(FakeDiscovery::new());
        let mut core = DiscoveryReport::new("core");
        core.arp = vec![arp("10.0.0.2", "00:00:00:00:00:02")];
        adapter.set(core);

        let mapper = mapper(adapter.clone(), 0).await;
        mapper.run_cycle().await;

        adapter.clear("core");
        let diff = mapper.run_cycle().await;
        assert!(diff.removed.is_empty());
        assert_eq!(mapper.view().snapshot().await.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_link_removed_after_grace() {
        let adapter = Arc::new(FakeDiscovery::new());
        let mut core = DiscoveryReport::new("core");
        core.arp = vec![arp("10.0.0.2", "00:00:00:00:00:02")];
        adapter.set(core);
        let mapper = mapper(adapter.clone(), 1).await;
        mapper.run_cycle().await;

        // core 仍然可发现，但邻居消失
        adapter.set(DiscoveryReport::new("core"));
        assert!(mapper.run_cycle().await.removed.is_empty());
        let diff = mapper.run_cycle().await;
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(mapper.view().version().await, 2);
        assert_eq!(mapper.history().await.len(), 2);
    }

    struct CountingListener {
        calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl TopologyListener for CountingListener {
        async fn on_topology_changed(&self, snapshot: Arc<TopologySnapshot>, _diff: &TopologyDiff) {
            self.calls.lock().unwrap().push(snapshot.version());
        }
    }

    #[tokio::test]
    async fn test_listener_notified_each_cycle() {
        let adapter = Arc::new(FakeDiscovery::new());
        let mut core = DiscoveryReport::new("core");
        core.arp = vec![arp("10.0.0.2", "00:00:00:00:00:02")];
        adapter.set(core);

        let listener = Arc::new(CountingListener {
            calls: Mutex::new(Vec::new()),
        });
        let mapper = mapper(adapter, 0).await.with_listener(listener.clone());
        mapper.run_cycle().await;
        mapper.run_cycle().await;

        assert_eq!(*listener.calls.lock().unwrap(), vec![1, 1]);
    }
}
