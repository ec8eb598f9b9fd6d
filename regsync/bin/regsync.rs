use std::{path::Path, sync::atomic::Ordering, time::Duration};

use clap::Parser;
use regsync::{
    cli::RegsyncArgs,
    config::Config,
    sync::{SyncClient, SyncOptions},
    utils, RegsyncResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> RegsyncResult<()> {
    let args = RegsyncArgs::parse();
    let _log_guard = init_subscriber(args.log.as_deref());

    let config = Config::load(
        args.auth.as_deref(),
        args.images.as_deref(),
        args.config.as_deref(),
        args.registry.clone().or_else(utils::get_default_registry),
    )?;

    let options = SyncOptions {
        worker_count: args.proc,
        retries: args.retries,
        os_filter: args.os_filter,
        arch_filter: args.arch_filter,
        force_update: args.force,
        output_success_images: args.output_success_images,
        output_images_format: args.output_images_format,
    };

    let client = SyncClient::new(config, options);
    install_signal_handler(&client);

    match utils::get_sync_interval() {
        Some(seconds) => {
            tracing::info!("Running in periodic mode, syncing every {}s", seconds);
            client.run_every(Duration::from_secs(seconds)).await
        }
        None => client.run().await,
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes the tracing subscriber, logging to the given file when one
/// is configured and to stderr otherwise. The returned guard must stay
/// alive for buffered file output to flush.
fn init_subscriber(log: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            let appender = tracing_appender::rolling::never(
                directory.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Sets the client's shutdown flag on SIGINT or SIGTERM. Workers finish
/// their current task before exiting; periodic mode stops between runs.
fn install_signal_handler(client: &SyncClient) {
    let shutdown = client.shutdown_flag();

    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = interrupt => {}
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = interrupt.await;
        }

        tracing::warn!("Shutdown requested, finishing in-flight tasks ...");
        shutdown.store(true, Ordering::Release);
    });
}
