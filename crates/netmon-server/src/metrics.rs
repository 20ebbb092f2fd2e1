use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use netmon_notify::HealthSnapshot;
use std::net::SocketAddr;

/// 初始化 Prometheus metrics exporter
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    // 描述所有指标
    describe_metrics();

    tracing::info!("Metrics exporter started on http://{}/metrics", addr);
    Ok(())
}

/// 描述所有指标
fn describe_metrics() {
    // 轮询
    describe_counter!("netmon_polls_total", "Total number of device poll attempts");
    describe_counter!(
        "netmon_poll_failures_total",
        "Total number of failed device poll attempts"
    );
    describe_gauge!("netmon_devices_total", "Number of configured devices");
    describe_gauge!("netmon_devices_reachable", "Number of reachable devices");
    describe_counter!(
        "netmon_samples_discarded_total",
        "Total number of samples discarded as invalid"
    );

    // 告警
    describe_counter!("netmon_alerts_raised_total", "Total number of alerts raised");
    describe_gauge!("netmon_alerts_active", "Number of alerts not yet resolved");

    // 通知
    describe_counter!(
        "netmon_notifications_sent_total",
        "Total number of notifications delivered"
    );
    describe_counter!(
        "netmon_notification_failures_total",
        "Total number of failed notification deliveries"
    );
    describe_counter!("netmon_digests_sent_total", "Total number of digests dispatched");
    describe_gauge!(
        "netmon_notification_tier_failures",
        "Notifications for which every routed channel failed"
    );

    // 拓扑
    describe_gauge!("netmon_topology_version", "Current topology snapshot version");
    describe_gauge!("netmon_topology_edges", "Number of edges in the topology");
}

/// 记录设备数量
pub fn record_devices(total: usize, reachable: usize) {
    gauge!("netmon_devices_total", total as f64);
    gauge!("netmon_devices_reachable", reachable as f64);
}

/// 记录未恢复告警数
pub fn record_active_alerts(count: usize) {
    gauge!("netmon_alerts_active", count as f64);
}

/// 记录拓扑规模
pub fn record_topology(version: u64, edges: usize) {
    gauge!("netmon_topology_version", version as f64);
    gauge!("netmon_topology_edges", edges as f64);
}

/// 记录分发器健康状态
pub fn record_dispatch_health(health: &HealthSnapshot) {
    gauge!("netmon_notification_tier_failures", health.tier_failures as f64);
}
