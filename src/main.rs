use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};

use tinycoin::network::{self, GossipEngine, PeerRegistry};
use tinycoin::node::Node;
use tinycoin::wallet::Wallet;
use tinycoin::web::{self, AppState};
use tinycoin::{NodeError, Result};

#[derive(Debug, Parser)]
#[command(name = "tinycoin")]
struct Opt {
    #[arg(help = "web server port")]
    web_port: u16,
    #[arg(help = "p2p server port")]
    p2p_port: u16,
    #[arg(
        short = 'k',
        long = "key_location",
        default_value = "wallet/private_key.pem",
        help = "location of wallet private key"
    )]
    key_location: PathBuf,
}

fn initialize_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

async fn run(opt: Opt) -> Result<()> {
    let wallet = Wallet::load_or_create(&opt.key_location)?;
    info!("my public address is: {}", wallet.get_address_hex());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let node = Node::new(wallet, events_tx);
    let peers = Arc::new(PeerRegistry::new());
    let engine = GossipEngine::new(&node, peers);

    // Chain-change events fan out to peers through the gossip engine.
    tokio::spawn(engine.clone().run_event_pump(events_rx));

    let p2p_engine = engine.clone();
    let p2p_port = opt.p2p_port;
    let p2p_handle = tokio::spawn(async move {
        network::start_p2p_server(p2p_engine, p2p_port).await
    });

    let state = AppState { node, engine };
    let web_port = opt.web_port;
    let web_handle = tokio::spawn(async move { web::serve(state, web_port).await });

    // Either server failing (or the web server finishing its graceful
    // shutdown) takes the process down.
    tokio::select! {
        result = p2p_handle => match result {
            Ok(Err(e)) => return Err(e),
            _ => info!("p2p server stopped"),
        },
        result = web_handle => match result {
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => info!("web server stopped gracefully"),
            Err(e) => return Err(NodeError::Transport(e.to_string())),
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    initialize_logging();

    let opt = Opt::parse();

    if let Err(e) = run(opt).await {
        error!("fatal: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
