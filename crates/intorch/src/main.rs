//! SONiC IntOrch entry point.
//!
//! Computes the INT table plans of one device and applies them to an
//! in-memory rule store, printing every submitted plan as JSON.

use clap::Parser;
use log::{error, info, warn};
use sonic_intorch::int::{
    load_rules, AppId, DeviceConfigMap, DeviceId, InMemoryRuleStore, IntOrch, IntOrchConfig,
    IntOrchError, IntReportConfig, PipelineFieldWidths, Result,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// SONiC In-band Network Telemetry orchestrator
#[derive(Parser, Debug)]
#[command(name = "intorch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// INT report configuration (JSON)
    #[arg(short = 'r', long)]
    report_config: Option<PathBuf>,

    /// Per-device INT configuration (JSON map of device id to {sid, ip})
    #[arg(short = 'c', long)]
    device_config: PathBuf,

    /// Device to program
    #[arg(short = 'd', long)]
    device: String,

    /// Application owning the rules
    #[arg(short = 'a', long, default_value = "sonic.intorch")]
    app: String,

    /// Rules already installed on the device (JSON list)
    #[arg(short = 'e', long)]
    existing: Option<PathBuf>,

    /// Remove every INT rule from the device instead of setting up
    #[arg(long)]
    cleanup: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

async fn run(args: Args) -> Result<()> {
    let devices = DeviceConfigMap::load(&args.device_config)?;
    info!("Loaded INT config for {} device(s)", devices.len());

    let store = Arc::new(InMemoryRuleStore::new());
    if let Some(ref path) = args.existing {
        let rules = load_rules(path)?;
        info!("Installing {} existing rule(s)", rules.len());
        store.install(rules).map_err(|e| IntOrchError::StoreFailure {
            family: "existing".to_string(),
            message: e.to_string(),
        })?;
    }

    let mut orch = IntOrch::new(
        IntOrchConfig::new(DeviceId::new(args.device), AppId::new(args.app)),
        store.clone(),
        Arc::new(devices),
        Arc::new(PipelineFieldWidths),
    );

    if args.cleanup {
        let report = orch.cleanup().await?;
        for (rule, e) in &report.failures {
            warn!("Not removed: {} ({})", rule, e);
        }
        println!(
            "{}",
            serde_json::json!({ "removed": report.removed, "failed": report.failures.len() })
        );
        return Ok(());
    }

    let report_config = args.report_config.ok_or_else(|| {
        IntOrchError::InvalidConfig("--report-config is required unless --cleanup is given".to_string())
    })?;
    let report = IntReportConfig::load(&report_config)?;
    orch.set_up_int_config(&report).await?;

    let submissions = store.submissions().map_err(|e| IntOrchError::StoreFailure {
        family: "submissions".to_string(),
        message: e.to_string(),
    })?;
    let plans: Vec<_> = submissions
        .iter()
        .map(|(device, plan)| serde_json::json!({ "device": device, "plan": plan }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&plans)?);

    let stats = orch.stats();
    info!(
        "INT set up: {} rule(s) added, {} removed",
        stats.rules_added, stats.rules_removed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting SONiC intorch for {}", args.device);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("intorch failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
