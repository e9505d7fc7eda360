//! Parley Node -- peer-to-peer messaging from the terminal.
//!
//! Usage:
//!   parley-node                        # Run with default config
//!   parley-node --config path.toml     # Run with custom config
//!   parley-node --name alice --port 5001
//!
//! Commands on stdin:
//!   connect <host:port>     open a conversation
//!   send <peer-id> <text>   send a text message
//!   list                    list live sessions
//!   history <peer-id>       show the stored log for a peer
//!   clear <peer-id>         clear the stored log for a peer
//!   quit                    end all conversations and exit

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use parley_node::config::NodeConfig;
use parley_node::{expand_tilde, load_or_create_node_id, local_identity, PeerNode};
use parley_storage::ConversationStore;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "parley-node", about = "Parley peer-to-peer messaging node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.parley/config.toml")]
    config: String,

    /// Display name (overrides config)
    #[arg(short, long)]
    name: Option<String>,

    /// Listen port (overrides the port in listen_addr)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_node=info,parley_storage=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut cfg = NodeConfig::load_or_default(&config_path)?;
    if let Some(name) = cli.name {
        cfg.node.name = name;
    }
    if let Some(port) = cli.port {
        let mut addr: SocketAddr = cfg.node.listen_addr.parse()?;
        addr.set_port(port);
        cfg.node.listen_addr = addr.to_string();
    }

    run_node(cfg).await
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let data_dir = expand_tilde(&cfg.node.data_dir);
    let id = match cfg.node.id.clone() {
        Some(id) => id,
        None => load_or_create_node_id(&data_dir.join("node-id"))?,
    };
    let local = local_identity(
        &cfg.node.name,
        &id,
        &cfg.node.listen_addr,
        cfg.node.advertise_ip.as_deref(),
    )?;
    tracing::info!(node = %local, data_dir = %data_dir.display(), "starting parley node");

    let store = Arc::new(ConversationStore::open(
        &data_dir,
        local.clone(),
        cfg.node.durability,
    )?);
    let node = PeerNode::new(local, store, cfg.node.listen_addr.clone(), cfg.timeouts.clone());
    let bound = node.start_listening().await?;
    println!("listening on {bound} as {}", node.local());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_command(&node, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl-C");
                break;
            }
        }
    }

    node.stop().await?;
    Ok(())
}

/// Execute one stdin command. Returns false when the driver should exit.
async fn run_command(node: &PeerNode, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "" => {}
        "connect" => {
            println!("{}", node.start_conn(rest).await);
        }
        "send" => {
            let Some((peer_id, text)) = rest.split_once(' ') else {
                println!("usage: send <peer-id> <text>");
                return true;
            };
            if let Err(e) = node.send_text(peer_id, text).await {
                println!("send failed: {e}");
            }
        }
        "list" => {
            let sessions = node.sessions().await;
            if sessions.is_empty() {
                println!("no live sessions");
            }
            for s in sessions {
                println!(
                    "{}  {}  {} messages",
                    s.peer.id(),
                    s.peer,
                    s.history.len()
                );
            }
        }
        "history" => match node.store().read_history(rest) {
            Ok(history) => {
                for m in history {
                    println!("[{}] {}: {}", m.datetime(), m.sender().name(), m.content());
                }
            }
            Err(e) => println!("history failed: {e}"),
        },
        "clear" => {
            if let Err(e) = node.clear_history(rest).await {
                println!("clear failed: {e}");
            }
        }
        "quit" | "exit" => return false,
        other => {
            println!("unknown command {other:?}");
        }
    }
    true
}
