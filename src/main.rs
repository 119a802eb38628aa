use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use speech_pool::config::{Cli, Settings};
use speech_pool::dispatcher::Dispatcher;
use speech_pool::events::TracingEventSink;
use speech_pool::rpc;
use speech_pool::tts::DemoTtsProvider;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match Settings::from_cli(cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        host = %settings.host,
        port = settings.port,
        api_path = %settings.api_path,
        tts_api_url = %settings.tts_api_url,
        tts_api_limit = settings.tts_api_limit.get(),
        max_cache_items = settings.max_cache_items.get(),
        "starting speech_pool"
    );

    // A real deployment would dial `settings.tts_api_url` through an HTTP
    // client here; the shipped provider stands in behind the same trait.
    let provider = Arc::new(DemoTtsProvider::new(settings.tts_tick));
    let dispatcher = Arc::new(Dispatcher::new(
        settings.tts_api_limit.get(),
        provider,
        Arc::new(TracingEventSink),
        settings.max_cache_items,
    ));

    let app = rpc::router(&settings.api_path, dispatcher);
    let addr = std::net::SocketAddr::new(settings.host, settings.port);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "listening");
    let result = axum::Server::from_tcp(listener.into_std().unwrap())
        .expect("std listener is valid")
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
