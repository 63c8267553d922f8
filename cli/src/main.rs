//! The `plotsync` binary: one replication node.
//!
//! Wires configuration, logging, and the shared key together, then hands
//! control to the replication loop. The simulator (out of process scope
//! here) appends observations through the shared store handle.

use {
    clap::Parser,
    log::{error, info, LevelFilter},
    plotsync_core::ReplServer,
    plotsync_db::PlotDb,
    plotsync_net::{ReplConfig, ReplKey},
    std::{
        net::SocketAddr,
        path::PathBuf,
        process,
        sync::{atomic::AtomicBool, Arc, Mutex},
    },
};

#[derive(Parser, Debug)]
#[command(name = "plotsync", about = "Drone plot replication node")]
struct Args {
    /// This node's identity, announced to peers during the handshake.
    #[arg(long)]
    node_id: String,

    /// Address to bind the replication listener on.
    #[arg(long, default_value = "127.0.0.1:9999")]
    bind: SocketAddr,

    /// A replication peer, as `<id>=<host:port>`. Repeatable.
    #[arg(long = "peer", value_name = "ID=ADDR")]
    peers: Vec<String>,

    /// Path to the raw 16-byte shared replication key.
    #[arg(long)]
    key_file: PathBuf,

    /// Simulation clock speed-up. 1.0 = real time.
    #[arg(long, default_value_t = 1.0)]
    time_mult: f64,

    /// Adjusted seconds between replication rounds.
    #[arg(long, default_value_t = 20)]
    repl_interval: i64,

    /// Stdout chattiness, 0 (errors only) to 3 (trace).
    #[arg(short, long, default_value_t = 1)]
    verbosity: u8,
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn parse_peer(entry: &str) -> Result<(String, SocketAddr), String> {
    let (id, addr) = entry
        .split_once('=')
        .ok_or_else(|| format!("peer '{entry}' is not of the form ID=ADDR"))?;
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("peer '{entry}' has a bad address: {e}"))?;
    Ok((id.to_string(), addr))
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(level_for(args.verbosity))
        .parse_default_env()
        .init();

    let peers = match args.peers.iter().map(|p| parse_peer(p)).collect::<Result<Vec<_>, _>>() {
        Ok(peers) => peers,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    // A missing or malformed key is fatal before the loop begins.
    let key = match ReplKey::load(&args.key_file) {
        Ok(key) => key,
        Err(e) => {
            error!("cannot start without the shared key: {e}");
            process::exit(1);
        }
    };

    let config = ReplConfig {
        node_id: args.node_id.clone(),
        bind_addr: args.bind,
        peers,
        key_path: args.key_file,
        time_mult: args.time_mult,
        secs_between_repl: args.repl_interval,
        verbosity: args.verbosity,
        ..ReplConfig::default()
    };

    info!(
        "starting node {} on {} with {} peers",
        config.node_id,
        config.bind_addr,
        config.peers.len()
    );

    let db = Arc::new(Mutex::new(PlotDb::new()));
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut server = ReplServer::new(db, config, key, shutdown);

    if let Err(e) = server.run() {
        error!("replication server failed: {e}");
        process::exit(1);
    }
}
