use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use frame_bus::{PipelineSupervisor, SupervisorMode};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

mod config;
mod engines;
mod render;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .filter_module("frame_bus", level)
        .filter_module("vidtex", level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::from_args(std::env::args_os())?;
    init_logging(config.verbose);
    frame_bus::init().context("decoder init")?;

    let locators = config.locators();
    log::info!("playing {} sources: {:?}", locators.len(), locators);
    let mut supervisor = PipelineSupervisor::new(
        locators,
        Arc::new(engines::EngineSelector),
        config.supervisor_config(),
    );
    let mut uploader = render::TextureUploader::new(supervisor.slot_count());
    let hint = supervisor.hint();
    supervisor.start();

    let cancel = CancellationToken::new();
    if let Some(run_for) = config.run_for() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            log::info!("run time of {:?} elapsed", run_for);
            cancel.cancel();
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("cannot listen for Ctrl-C: {}", e);
                return;
            }
            log::info!("interrupted");
            cancel.cancel();
        });
    }

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let running = supervisor.mode() == SupervisorMode::Running;
        tokio::select! {
            _ = ticker.tick() => {},
            _ = hint.notified() => {},
            _ = report.tick() => uploader.report(&supervisor),
            _ = cancel.cancelled(), if running => {},
        }
        if running && cancel.is_cancelled() {
            supervisor.request_shutdown();
        }

        supervisor.tick(&mut uploader);
        if supervisor.is_shutdown_complete() {
            break;
        }
    }

    uploader.report(&supervisor);
    log::info!(
        "done: {} frames uploaded, {} skipped",
        uploader.uploaded(),
        uploader.skipped()
    );
    Ok(())
}
