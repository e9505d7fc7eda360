//! Parley Node -- library crate for peer-to-peer messaging.
//!
//! Exposes the node, sessions, transport, and config so the binary and the
//! integration tests share one implementation.

pub mod config;
pub mod handshake;
pub mod history_sync;
pub mod node;
pub mod session;
pub mod transport;

pub use node::{NodeError, PeerNode, CONNECTION_CREATED, CONNECTION_FAILED};
pub use session::{SessionError, SessionSnapshot};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use parley_protocol::Identity;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Read the node id from `path`, generating and persisting one on first run.
pub fn load_or_create_node_id(path: &Path) -> anyhow::Result<String> {
    if path.exists() {
        let id = std::fs::read_to_string(path)?.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let id = hex::encode(bytes);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &id)?;

    tracing::info!(path = %path.display(), %id, "generated node id");
    Ok(id)
}

/// Build our identity: `advertise_ip` if set, else the listen ip, with
/// unspecified addresses advertised as loopback.
pub fn local_identity(
    name: &str,
    id: &str,
    listen_addr: &str,
    advertise_ip: Option<&str>,
) -> anyhow::Result<Identity> {
    let listen: SocketAddr = listen_addr.parse()?;
    let ip = match advertise_ip {
        Some(ip) => ip.to_string(),
        None if listen.ip().is_unspecified() => "127.0.0.1".to_string(),
        None => listen.ip().to_string(),
    };
    Ok(Identity::new(name, id, ip, listen.port())?)
}
