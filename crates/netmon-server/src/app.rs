use crate::observer::PipelineObserver;
use crate::resources::{CheckpointResource, DispatcherResource, EvaluationResource, TaskGroup};
use crate::state::{StateFiles, TopologyCheckpointer};
use anyhow::Context;
use chrono::Utc;
use netmon_alert::{AlertEngine, AlertSettings, EvaluationRouter};
use netmon_config::{
    build_devices, CredentialResolver, EnvCredentialResolver, MonitorConfig, RuntimeSettings,
};
use netmon_device::DeviceInventory;
use netmon_metrics::{MetricsStore, Report, ReportGenerator, ReportKind, RetentionSweeper, ShardedStore};
use netmon_notify::{DispatchHealth, DispatchReport, Dispatcher};
use netmon_poller::{Poller, PollerSettings};
use netmon_protocol::{AdapterRegistry, SystemCommandRunner, VendorProfiles};
use netmon_shutdown::{
    ResourceManager, ShutdownCoordinator, ShutdownReport, ShutdownSignal, SignalHandler,
};
use netmon_topology::{MapperSettings, TopologyMapper, TopologyView};
use netmon_types::Reachability;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

const STORE_SHARDS: usize = 16;
const EVALUATION_QUEUE: usize = 1024;
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// 启动选项
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// 启动时立即执行一次拓扑发现
    pub refresh_topology: bool,
}

/// 监控进程
///
/// `build` 只打开状态和清单，不启动任何后台任务；报表和通知测试模式复用它。
pub struct Monitor {
    config: MonitorConfig,
    runtime: RuntimeSettings,
    inventory: Arc<DeviceInventory>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<ShardedStore>,
    files: Arc<StateFiles>,
    view: TopologyView,
}

impl Monitor {
    pub async fn build(config: MonitorConfig, runtime: RuntimeSettings) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.state_dir)
            .await
            .with_context(|| format!("cannot open state directory {}", config.state_dir.display()))?;

        let resolver = EnvCredentialResolver;
        let adapters = Arc::new(AdapterRegistry::with_defaults(
            Arc::new(SystemCommandRunner),
            Arc::new(VendorProfiles::builtin()),
            runtime.ping_timeout,
            runtime.snmp_timeout,
            runtime.ssh_timeout,
        ));

        let devices = build_devices(&config, &resolver, &adapters.supported());
        let inventory = Arc::new(
            DeviceInventory::from_devices(devices)
                .await
                .context("failed to build device inventory")?,
        );

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(runtime.retention_days));
        let store = Arc::new(
            ShardedStore::open(config.state_dir.join("metrics"), STORE_SHARDS, cutoff)
                .await
                .context("failed to open metrics store")?,
        );

        let files = Arc::new(StateFiles::new(&config.state_dir));
        let view = match files.load_topology().await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "Topology checkpoint unreadable, starting with an empty topology");
                TopologyView::new()
            }
        };

        Ok(Self {
            config,
            runtime,
            inventory,
            adapters,
            store,
            files,
            view,
        })
    }

    pub fn inventory(&self) -> Arc<DeviceInventory> {
        self.inventory.clone()
    }

    pub fn alert_settings(&self) -> AlertSettings {
        AlertSettings {
            dedup_window: self.runtime.dedup_window,
            correlation_window: self.runtime.correlation_window,
            max_alerts_per_hour: self.runtime.max_alerts_per_hour as usize,
            blast_radius_hops: self.config.discovery.max_hops,
            history_limit: self.config.alerting.history_limit,
            notify_on_resolve: self.config.notifications.notify_on_resolve,
            runbook: self.config.runbook(),
        }
    }

    pub fn mapper_settings(&self) -> MapperSettings {
        MapperSettings {
            interval: Duration::from_secs(self.config.discovery.interval_secs.max(1)),
            grace_cycles: self.config.discovery.removal_grace_cycles,
            networks: self.config.discovery.networks.clone(),
            ..MapperSettings::default()
        }
    }

    fn dispatcher(&self, resolver: &dyn CredentialResolver) -> Dispatcher {
        Dispatcher::from_config(
            &self.config.notifications,
            &self.config.business_services,
            resolver,
        )
    }

    /// 生成并写出统计报表
    pub async fn generate_report(&self, kind: ReportKind) -> anyhow::Result<(Report, PathBuf)> {
        let store: Arc<dyn MetricsStore> = self.store.clone();
        let generator = ReportGenerator::new(store);
        let report = generator.generate(kind, Utc::now()).await;
        let path = generator
            .write(&report, &self.config.reports_dir)
            .await
            .context("failed to write report")?;
        Ok((report, path))
    }

    /// 每个级别发送一条测试通知
    pub async fn test_notifications(&self) -> Vec<DispatchReport> {
        self.dispatcher(&EnvCredentialResolver).send_test().await
    }

    /// 启动所有组件并运行到收到关闭信号
    pub async fn run(self, options: RunOptions) -> anyhow::Result<ShutdownReport> {
        let (signal_handler, _signal_rx) = SignalHandler::new();

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(AlertEngine::new(
            self.alert_settings(),
            self.inventory.clone(),
            self.view.clone(),
            self.config.business_services.clone(),
            notify_tx,
        ));
        if let Err(e) = self.files.restore_alerts(&engine).await {
            warn!(error = %e, "Alert checkpoint unreadable, starting with no open alerts");
        }

        let dispatcher = Arc::new(self.dispatcher(&EnvCredentialResolver));
        let dispatcher_task = tokio::spawn(dispatcher.clone().run(notify_rx));

        let router = Arc::new(EvaluationRouter::start(
            engine.clone(),
            self.config.alerting.evaluation_shards,
            EVALUATION_QUEUE,
        ));
        let observer = Arc::new(PipelineObserver::new(self.store.clone(), router.clone()));
        let poller = Arc::new(Poller::new(
            self.inventory.clone(),
            self.adapters.clone(),
            observer,
            PollerSettings::from_runtime(&self.runtime, &self.config.poller),
        ));

        let background = Arc::new(TaskGroup::new("background", 15));

        let mapper = Arc::new(
            TopologyMapper::new(
                self.inventory.clone(),
                self.adapters.clone(),
                self.view.clone(),
                self.mapper_settings(),
            )
            .with_listener(engine.clone())
            .with_listener(Arc::new(TopologyCheckpointer::new(self.files.clone()))),
        );
        if options.refresh_topology {
            let diff = mapper.run_cycle().await;
            info!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                "Topology refreshed"
            );
        }
        if self.runtime.topology_enabled {
            background
                .push(tokio::spawn(mapper.clone().run(signal_handler.subscribe())))
                .await;
        } else {
            info!("Topology mapping disabled");
        }

        let store: Arc<dyn MetricsStore> = self.store.clone();
        let sweeper = RetentionSweeper::new(store, self.runtime.retention_days, RETENTION_SWEEP_INTERVAL);
        background
            .push(tokio::spawn(sweeper.run(signal_handler.subscribe())))
            .await;

        background
            .push(tokio::spawn(housekeeping_loop(
                engine.clone(),
                self.inventory.clone(),
                dispatcher.health(),
                Duration::from_secs(self.config.alerting.housekeeping_interval_secs.max(1)),
                signal_handler.subscribe(),
            )))
            .await;

        background
            .push(tokio::spawn(checkpoint_loop(
                self.files.clone(),
                engine.clone(),
                Duration::from_secs(self.config.alerting.checkpoint_interval_secs.max(1)),
                signal_handler.subscribe(),
            )))
            .await;

        let pollers = Arc::new(TaskGroup::new("poller", 10));
        let in_flight = poller.in_flight();
        pollers
            .push(tokio::spawn(poller.run(signal_handler.subscribe())))
            .await;

        let mut resources = ResourceManager::new();
        resources.register(pollers);
        resources.register(background);
        resources.register(Arc::new(EvaluationResource::new(router, engine.clone())));
        resources.register(Arc::new(DispatcherResource::new(dispatcher, dispatcher_task)));
        resources.register(Arc::new(CheckpointResource::new(
            self.files.clone(),
            engine,
            self.view.clone(),
        )));

        let coordinator = ShutdownCoordinator::builder()
            .with_signal_handler(signal_handler.clone())
            .with_in_flight_tracker(in_flight)
            .with_resource_manager(resources)
            .with_shutdown_timeout(SHUTDOWN_TIMEOUT)
            .build();

        tokio::spawn(async move {
            signal_handler.listen_system_signals().await;
        });

        info!(
            devices = self.inventory.count().await,
            enabled = self.inventory.enabled().await.len(),
            "netmon started"
        );
        Ok(coordinator.run().await)
    }
}

/// 周期性过期去重/关联记录并更新自监控指标
async fn housekeeping_loop(
    engine: Arc<AlertEngine>,
    inventory: Arc<DeviceInventory>,
    health: DispatchHealth,
    period: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.housekeeping(Utc::now()).await;

                let devices = inventory.list().await;
                let reachable = devices
                    .iter()
                    .filter(|d| d.reachability == Reachability::Reachable)
                    .count();
                crate::metrics::record_devices(devices.len(), reachable);
                crate::metrics::record_active_alerts(engine.active_alerts().await.len());

                let snapshot = health.snapshot();
                crate::metrics::record_dispatch_health(&snapshot);
                if health.is_degraded() {
                    warn!(tier_failures = snapshot.tier_failures, "Notification delivery degraded");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// 周期性保存告警状态
async fn checkpoint_loop(
    files: Arc<StateFiles>,
    engine: Arc<AlertEngine>,
    period: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = files.save_alerts(&engine).await {
                    error!(error = %e, "Failed to checkpoint alert state");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
