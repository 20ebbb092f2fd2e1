use anyhow::Context;
use clap::Parser;
use netmon_config::{ConfigLoader, LoggingConfig, RuntimeSettings};
use netmon_metrics::{Report, ReportKind};
use netmon_notify::{ChannelOutcome, DispatchReport};
use netmon_server::{logging, metrics, Monitor, RunOptions};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Network device monitoring daemon", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "netmon.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Run one topology discovery cycle at startup
    #[arg(long)]
    refresh_topology: bool,

    /// Write a daily or weekly report and exit
    #[arg(long, value_name = "KIND")]
    generate_report: Option<ReportKind>,

    /// Send a test notification per severity and exit
    #[arg(long, conflicts_with = "generate_report")]
    test_notifications: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match ConfigLoader::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&LoggingConfig::default(), args.debug);
            tracing::error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            return Err(e).context("fatal configuration error");
        }
    };
    logging::init_logging(&config.logging, args.debug);

    let runtime = RuntimeSettings::from_env().context("invalid environment settings")?;
    tracing::info!("Starting netmon with config: {}", args.config.display());

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics_addr {}", addr))?;
        metrics::init_metrics(addr)?;
    }

    let monitor = Monitor::build(config, runtime).await?;

    if let Some(kind) = args.generate_report {
        let (report, path) = monitor.generate_report(kind).await?;
        print_report(&report);
        println!("report written to {}", path.display());
        return Ok(());
    }

    if args.test_notifications {
        let reports = monitor.test_notifications().await;
        print_test_results(&reports);
        return Ok(());
    }

    let report = monitor
        .run(RunOptions {
            refresh_topology: args.refresh_topology,
        })
        .await?;

    if report.is_clean() {
        tracing::info!(elapsed = ?report.elapsed, "netmon stopped");
        Ok(())
    } else {
        anyhow::bail!(
            "shutdown incomplete (drained: {}, failed resources: {:?})",
            report.drained,
            report.failed_resources
        )
    }
}

fn print_report(report: &Report) {
    println!(
        "{} report {} .. {} ({} series)",
        report.kind.as_str(),
        report.from.format("%Y-%m-%d %H:%M"),
        report.to.format("%Y-%m-%d %H:%M"),
        report.series.len()
    );
    for s in &report.series {
        println!(
            "  {:<20} {:<24} n={:<6} min={:<10.2} max={:<10.2} avg={:<10.2} last={:.2}",
            s.device_id, s.metric, s.count, s.min, s.max, s.avg, s.last
        );
    }
}

fn print_test_results(reports: &[DispatchReport]) {
    for report in reports {
        if report.outcomes.is_empty() {
            println!("{:<8} no channel routed", report.severity.to_string());
            continue;
        }
        for (channel, outcome) in &report.outcomes {
            let result = match outcome {
                ChannelOutcome::Delivered { attempts } => format!("delivered ({} attempt(s))", attempts),
                ChannelOutcome::Duplicate => "duplicate".to_string(),
                ChannelOutcome::Skipped => "skipped (not configured)".to_string(),
                ChannelOutcome::Failed { attempts, error } => {
                    format!("failed after {} attempt(s): {}", attempts, error)
                }
            };
            println!("{:<8} {:<8} {}", report.severity.to_string(), channel, result);
        }
    }
}
