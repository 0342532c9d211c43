//! worker daemon: consensus node + client server + status monitor

use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use raft_core::{ModelStore, Peer, RaftNode};
use worker::{Monitor, Trainer, WorkerServer};

#[derive(Parser, Debug)]
#[command(version, about = "Replicated model-training worker node", long_about = None)]
struct Args {
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port for client connections
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// HTTP port for the status monitor
    #[arg(long, default_value_t = 8000)]
    monitor_port: u16,

    /// Port for consensus RPCs
    #[arg(long, default_value_t = 10000)]
    raft_port: u16,

    /// Comma-separated peers as host:client_port
    #[arg(long, default_value = "")]
    peers: String,

    /// Storage directory (default: node<port-9000>_storage)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Program executing the training engine
    #[arg(long, default_value = "java")]
    engine: String,

    /// Classpath directory with the TrainingModule classes
    #[arg(long, default_value = "java")]
    java_dir: String,
}

fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let args = Args::parse();

    let storage_dir = args.storage_dir.clone().unwrap_or_else(|| {
        PathBuf::from(format!("node{}_storage", args.port.saturating_sub(9000)))
    });
    let models_dir = storage_dir.join("models");

    let peers = parse_peers(&args.peers, args.port, args.raft_port)?;
    let node = RaftNode::new(args.host.clone(), args.raft_port, args.port, peers);

    let store = ModelStore::new(&models_dir)?;
    let callback_store = store.clone();
    node.set_apply_callback(move |command| callback_store.apply(command));
    node.set_persistence_path(&storage_dir)?;
    node.start().context("failed to start consensus node")?;

    info!(
        "worker started: host={}, port={}, raft_port={}",
        args.host, args.port, args.raft_port
    );
    info!(
        "storage: {}, models: {}",
        storage_dir.display(),
        models_dir.display()
    );

    let monitor = Monitor::bind(&args.host, args.monitor_port, node.clone(), models_dir)
        .context("failed to bind status monitor")?;
    thread::spawn(move || monitor.serve());

    let trainer = Trainer::new(args.engine, args.java_dir);
    let server = WorkerServer::bind(&args.host, args.port, node, store, trainer)
        .context("failed to bind client server")?;
    server.serve();

    error!("client server exited");
    Ok(())
}

/// peers arrive as client addresses; each peer's rpc port keeps the
/// same offset from its client port as this node's does
fn parse_peers(list: &str, client_port: u16, raft_port: u16) -> anyhow::Result<Vec<Peer>> {
    let mut peers = Vec::new();
    for part in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (host, port) = part
            .rsplit_once(':')
            .with_context(|| format!("peer `{part}` is not host:port"))?;
        let peer_client: u16 = port
            .parse()
            .with_context(|| format!("peer `{part}` has a bad port"))?;
        let peer_rpc = (raft_port as i32 + (peer_client as i32 - client_port as i32)) as u16;
        peers.push(Peer::new(host, peer_rpc, peer_client));
    }
    Ok(peers)
}
