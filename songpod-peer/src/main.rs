// SongPod peer: song server in the background, interactive commands in the foreground.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use songpod_core::{CatalogAdvert, SongCatalog};
use songpod_peer::audio::DefaultBackend;
use songpod_peer::commands::{self, Shell};
use songpod_peer::{config, library, PlaybackController, Server, TrackerClient};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "songpod", version, about = "Peer node of the SongPod song-sharing network")]
struct Cli {
    /// Port to serve songs on
    port: u16,
    /// Directory holding .info records and the song files they name
    song_dir: PathBuf,
    /// Config file (default: ~/.config/songpod/config.toml, then /etc/songpod/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let result = start(cli);
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn start(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cli, cfg));
    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_background();
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,songpod_peer=info,songpod=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, cfg: config::Config) -> anyhow::Result<()> {
    let local = library::register_local(&cli.song_dir)
        .with_context(|| format!("loading songs from {}", cli.song_dir.display()))?;
    let catalog = Arc::new(SongCatalog::new(&cli.song_dir, local));

    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port));
    let server = Server::bind(bind, catalog.clone(), cfg.server_config()).await?;
    let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async move {
        let _ = server_stopped.await;
    }));

    let tracker = TrackerClient::new(cfg.tracker_addr.clone(), cfg.dial_timeout());
    let advert = CatalogAdvert {
        listen_port: cli.port,
        entries: catalog.local().to_vec(),
    };
    if let Err(e) = tracker.announce(&advert).await {
        warn!("could not register with tracker: {}", e);
        println!("Warning: not registered with tracker {} ({})", tracker.addr(), e);
    }

    let backend = Arc::new(DefaultBackend::new(cfg.output.clone(), cfg.device));
    let (playback, events) = PlaybackController::new(backend, cfg.playback_config());
    tokio::spawn(commands::report_events(events));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let shell = Shell::new(stdin, catalog, tracker.clone(), playback);
    tokio::select! {
        r = shell.run() => r.context("reading commands")?,
        r = shutdown_signal() => {
            r?;
            info!("interrupted");
            if let Err(e) = tracker.leave().await {
                warn!("could not deregister from tracker: {}", e);
            }
        }
    }

    let _ = stop_server.send(());
    let _ = server_task.await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
