//! Render-host CLI for stagelight.
//!
//! Wires the pieces together: layout store, zone/stage registries, proxy
//! pools with their render tick, the router task, and one supervised link
//! per remote endpoint (the relay upstream, viewers downstream).

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use network::{LinkConfig, LinkSupervisor};
use render_pool::{host_channel, PoolService, RenderTick};
use router::{BeatAssist, EffectRegistry, RouterCommand, RouterHandler};
use settings_manager::LayoutStore;
use spatial::{StageRegistry, ZoneRegistry};
use stage_core::LinkId;
use tokio::sync::mpsc;

mod viewer_sink;

use viewer_sink::ViewerSink;

/// stagelight - audio-reactive render proxies at host tick cadence
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Relay endpoint supplying audio state and control messages
    #[clap(long)]
    relay: SocketAddr,

    /// Viewer endpoints that mirror applied batches (repeatable)
    #[clap(long = "viewer")]
    viewers: Vec<SocketAddr>,

    /// Layout file path (defaults to the user config directory)
    #[clap(long)]
    layout: Option<PathBuf>,

    /// Render tick interval in milliseconds
    #[clap(long, default_value_t = 50)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging based on debug flag
    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("starting stagelight render host");

    let store = match &args.layout {
        Some(path) => LayoutStore::with_file(path),
        None => LayoutStore::new(),
    }
    .map_err(|e| anyhow::anyhow!("failed to open layout store: {}", e))?;

    let mut zones = ZoneRegistry::new();
    let mut stages = StageRegistry::new();
    store.layout().populate(&mut zones, &mut stages);
    info!(
        "loaded layout: {} zones, {} stages",
        zones.len(),
        stages.len()
    );

    // The channel between decode-side batching and the render tick is the
    // single host-thread crossing.
    let (bridge, batch_rx) = host_channel(0);
    let mut pools = PoolService::new(Arc::new(bridge));

    let mut effects = EffectRegistry::with_builtins();
    for binding in &store.layout().effects {
        if let Err(e) = effects.activate(
            &binding.effect,
            &binding.zone,
            &binding.config,
            &zones,
            &mut pools,
        ) {
            warn!(
                "failed to activate effect '{}' on zone '{}': {}",
                binding.effect, binding.zone, e
            );
        }
    }

    // Attach commands for every link are queued before the router starts,
    // so the command channel must hold them all.
    let (command_tx, command_rx) = mpsc::channel(64);
    let (link_tx, link_rx) = mpsc::channel(256);

    // Viewer links first so the render sink can mirror into them.
    let mut supervisors = Vec::new();
    let mut viewer_handles = Vec::new();
    for addr in &args.viewers {
        let id = LinkId::new();
        let transport = Arc::new(network::udp::UdpTransport::new(*addr, "viewer"));
        let supervisor =
            LinkSupervisor::spawn(id, transport, LinkConfig::default(), link_tx.clone());
        viewer_handles.push(supervisor.handle());
        command_tx
            .send(RouterCommand::AttachLink {
                link: id,
                sink: Box::new(supervisor.handle()),
            })
            .await
            .ok();
        supervisors.push(supervisor);
        info!("supervising viewer link to {}", addr);
    }

    let relay_id = LinkId::new();
    let relay_transport = Arc::new(network::udp::UdpTransport::new(args.relay, "render_host"));
    let relay =
        LinkSupervisor::spawn(relay_id, relay_transport, LinkConfig::default(), link_tx.clone());
    command_tx
        .send(RouterCommand::AttachLink {
            link: relay_id,
            sink: Box::new(relay.handle()),
        })
        .await
        .ok();
    supervisors.push(relay);
    info!("supervising relay link to {}", args.relay);

    let tick = RenderTick::new(
        batch_rx,
        Box::new(ViewerSink::new(viewer_handles)),
        Duration::from_millis(args.tick_ms),
    );
    let tick_task = tokio::spawn(tick.run());

    let mut handler = RouterHandler::new(
        zones,
        stages,
        pools,
        effects,
        BeatAssist::default(),
        Some(store),
        command_rx,
        link_rx,
    );

    tokio::select! {
        result = handler.run() => {
            if let Err(e) = result {
                warn!("router stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    for supervisor in supervisors {
        supervisor.shutdown();
    }
    tick_task.abort();
    info!("stagelight stopped");

    Ok(())
}
