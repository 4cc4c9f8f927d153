use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

mod api;
mod cli;
mod metrics;
mod models;
mod services;
mod state;
mod storage;

use api::{get_metrics, get_program, health, list_programs};
use cli::CommandArgs;
use services::{
    FileDescriptionResolver, ProcessFilter, ProcessSnapshotProvider, ProcessWatcher,
    ProgramRecorder, RecorderHandle, SysinfoProvider,
};
use state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let state = AppState::new();
    let provider = Arc::new(SysinfoProvider::new());
    let filter = ProcessFilter::new(args.include.as_deref(), args.exclude.as_deref());

    let recorder = ProgramRecorder::new(
        state.clone(),
        provider.clone(),
        Arc::new(FileDescriptionResolver),
    );
    let recorder = RecorderHandle::spawn(recorder);

    if let Some(path) = &args.state_file {
        let programs = storage::load_programs(path)?;
        recorder.restore(programs)?;
    }

    let stray = recorder.reconcile().await?;
    if !stray.is_empty() {
        log::warn!(
            "⚠️  {} session(s) were left open by the previous run and have been closed: {}",
            stray.len(),
            stray.join(", ")
        );
    }

    log::info!("🔄 Taking snapshot of running processes...");
    let scan = provider.clone();
    let entries: Vec<_> = tokio::task::spawn_blocking(move || scan.running_processes())
        .await
        .context("Process snapshot failed")?
        .into_iter()
        .filter(|e| filter.allows(&e.name))
        .collect();

    let watcher = ProcessWatcher::new(provider.clone(), filter, args.poll_interval(), &entries);
    recorder.ingest_snapshot(entries)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checkpointer = args.state_file.clone().map(|path| {
        storage::spawn_checkpointer(path, state.clone(), args.checkpoint_interval(), shutdown_rx.clone())
    });
    let watcher_task = watcher.spawn(recorder.events(), shutdown_rx);

    print_banner(&args);

    let server_state = state.clone();
    let served = match HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .route("/api/programs", web::get().to(list_programs))
            .route("/api/programs/{name}", web::get().to(get_program))
            .route("/metrics", web::get().to(get_metrics))
            .route("/health", web::get().to(health))
    })
        .bind(&bind_address)
    {
        Ok(server) => server.run().await.context("HTTP server failed"),
        Err(e) => Err(e).with_context(|| format!("Failed to bind {}", bind_address)),
    };

    log::info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = watcher_task.await {
        log::error!("Process watcher task failed: {}", e);
    }
    if let Some(task) = checkpointer {
        if let Err(e) = task.await {
            log::error!("Checkpoint writer task failed: {}", e);
        }
    }

    let closed = recorder.shutdown().await?;
    log::info!("✅ Closed {} open session(s)", closed.len());

    if let Some(path) = &args.state_file {
        storage::save_programs(path, &state.snapshot())?;
        log::info!("💾 History saved to {}", path.display());
    }

    served
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Activity Monitor v0.1.1                              ║");
    println!("║      Per-executable usage session recorder                ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/programs           - List tracked programs");
    println!("  GET    /api/programs/{{name}}    - Program with its session history");
    println!("  GET    /metrics                - Prometheus metrics");
    println!("  GET    /health                 - Health check");
    println!();
    println!("💡 Settings:");
    println!("  • Poll interval: {} ms", args.poll_interval_ms);
    match &args.state_file {
        Some(path) => println!(
            "  • Checkpoint: {} (every {} s)",
            path.display(),
            args.checkpoint_interval_secs
        ),
        None => println!("  • Checkpoint: disabled (history is in-memory only)"),
    }
    println!("═══════════════════════════════════════════════════════════");
}
