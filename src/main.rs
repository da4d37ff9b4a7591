use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use travelnet_portal::admission;
use travelnet_portal::config::Args;
use travelnet_portal::gateway::{CommandRunner, SystemRunner};
use travelnet_portal::gateway::hotspot::HotspotBackend;
use travelnet_portal::logging;
use travelnet_portal::state::AppState;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    logging::init();

    let vpn_dir = args.vpn_dir();
    tokio::fs::create_dir_all(&vpn_dir)
        .await
        .with_context(|| format!("creating {}", vpn_dir.display()))?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let backend = HotspotBackend::probe(runner.as_ref(), &args).await;
    info!("Hotspot backend: {}", backend.mode());

    let addr = args.bind_addr();
    info!(
        "Rate limits per {}s window: polling={} read={} action={} sensitive={} critical={}, block {}s",
        args.rate_window,
        args.rate_limit_polling,
        args.rate_limit_read,
        args.rate_limit_action,
        args.rate_limit_sensitive,
        args.rate_limit_critical,
        args.block_duration
    );

    // creating shared state
    let state = Arc::new(AppState::new(&args, runner, backend));
    admission::spawn_purge_task(state.clone());

    let app = travelnet_portal::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("TravelNet portal running on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
