use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use command_relay::api;
use command_relay::demo::DemoHost;
use command_relay::error::RelayError;
use command_relay::hub::AppHub;
use command_relay::manager::RemoteCommandManager;
use command_relay::paths;
use command_relay::settings;
use command_relay::sources::WebSocketCommandSource;

#[derive(Parser)]
#[command(name = "command-relay", about = "Relay server for remote app commands", version)]
struct Args {
    /// Config directory (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Address to bind, overriding `server.bind` from settings
    #[arg(long)]
    bind: Option<String>,

    /// Connect an in-process demo app to the server
    #[arg(long)]
    demo_app: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!(error = %e, "command-relay failed");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), RelayError> {
    let config_dir = args.config_dir.unwrap_or_else(paths::default_config_dir);
    let loaded = settings::load_settings(&config_dir)?.unwrap_or_default();

    let bind = args.bind.unwrap_or(loaded.server.bind);
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| RelayError::InvalidArgs(format!("invalid bind address {bind}: {e}")))?;

    let hub = AppHub::new();
    let (bound, server) = api::start_api_server(hub, addr).await?;

    // Port file lets the CLI find the server.
    std::fs::create_dir_all(&config_dir)?;
    let port_file = paths::port_file_path(&config_dir);
    settings::atomic_write(&port_file, bound.port().to_string().as_bytes())?;
    info!(url = %format!("http://{bound}"), port_file = %port_file.display(), "Relay ready");

    let demo = if args.demo_app {
        let manager = RemoteCommandManager::new(Arc::new(DemoHost::sample()));
        let source = WebSocketCommandSource::connect(manager.clone(), &format!("ws://{bound}/ws"));
        manager.add_source("server", source)?;
        Some(manager)
    } else {
        None
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        res = server => {
            if let Err(e) = res {
                error!(error = %e, "API server task failed");
            }
        }
    }

    if let Some(manager) = demo {
        manager.remove_source("server");
    }
    let _ = std::fs::remove_file(&port_file);
    Ok(())
}
