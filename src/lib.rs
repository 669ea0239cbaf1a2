pub mod connection;
pub mod engine;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod settings;
mod utils;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use engine::MemoryEngine;
use pipeline::{PipelineController, PipelineInputs, PipelineStatus};
use render::{RenderTarget, TextBarRenderer};
use settings::SettingsStore;

pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let level = if settings::debug_logging() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("barcube starting up...");

    let store = SettingsStore::from_env()?;
    match store.path() {
        Some(path) => log::info!("settings loaded from {}", path.display()),
        None => log::info!("no settings file given, using defaults"),
    }
    let settings = store.settings().clone();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let controller = PipelineController::spawn(
            Arc::new(MemoryEngine::new()),
            Box::new(TextBarRenderer::new(settings.chart.width)),
            PipelineInputs::bar_chart(),
        );
        let target = RenderTarget::new();
        controller.attach_target(Some(target.clone()))?;
        controller.set_connection(Some(settings.connection_config()))?;

        let mut snapshots = controller.subscribe();
        let mut last_status = None;
        let outcome = loop {
            let snapshot = snapshots.borrow_and_update().clone();
            if last_status != Some(snapshot.status) {
                log::info!("pipeline status {:?} {}", snapshot.status, snapshot.message);
                last_status = Some(snapshot.status);
            }
            if let Some(failed) = snapshot.failure() {
                break Err(anyhow!(
                    "{} stage failed: {}",
                    failed.kind,
                    failed.error.as_deref().unwrap_or("unknown error")
                ));
            }
            if let Some(err) = &snapshot.render_error {
                break Err(anyhow!("chart could not be drawn: {err}"));
            }
            if snapshot.status == PipelineStatus::Ready && snapshot.render_count > 0 {
                break Ok(());
            }
            if snapshots.changed().await.is_err() {
                break Err(anyhow!("pipeline stopped before the chart was ready"));
            }
        };

        if outcome.is_ok() {
            println!("{}", target.text());
        }
        controller.shutdown().await?;
        outcome
    })
}
