//! multimpi-broker: JSON-RPC rendezvous server for leader and follower agents.
//!
//! Usage: `multimpi-broker <host> <port>`

mod reaper;
mod routes;
mod signals;
mod state;

use std::sync::Arc;

use multimpi_core::BrokerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

const USAGE: &str = "Usage: multimpi-broker <host> <port>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(String::as_str), Some("--help" | "-h")) {
        println!("{}", USAGE);
        return Ok(());
    }
    if args.len() != 3 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }
    let port: u16 = match args[2].parse() {
        Ok(port) => port,
        Err(_) => {
            eprintln!("bad port {:?}\n{}", args[2], USAGE);
            std::process::exit(2);
        }
    };

    let config = BrokerConfig::from_env(&args[1], port);
    signals::die_with_parent();

    let state = Arc::new(AppState::new(config));
    signals::install_signal_handlers(Arc::clone(&state))?;
    reaper::start_reaper(Arc::clone(&state));

    let addr = state.config.bind_addr();
    info!("multimpi broker listening on http://{}", addr);
    info!(
        "record lifetime {:?}, reaping every {:?}",
        state.config.record_lifetime, state.config.reap_interval
    );

    let app = routes::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { state.drained.notified().await })
        .await?;

    info!("broker stopped");
    Ok(())
}
