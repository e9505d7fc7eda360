//! Peer identity: who is on the other end of a connection.
//!
//! `id` is the only key. Name, ip and port are display/transport metadata and
//! play no part in equality or hashing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, HANDSHAKE_DELIMITER, IDENTITY_DELIMITER};

/// A resolved identity: name, stable id, and where the peer listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    name: String,
    id: String,
    ip: String,
    port: u16,
}

impl Identity {
    /// Build an identity. Fails if any field contains a wire delimiter.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
    ) -> Result<Self, ProtocolError> {
        let identity = Self {
            name: name.into(),
            id: id.into(),
            ip: ip.into(),
            port,
        };
        for field in [&identity.name, &identity.id, &identity.ip] {
            if field.contains(IDENTITY_DELIMITER) || field.contains(HANDSHAKE_DELIMITER) {
                return Err(ProtocolError::InvalidIdentity(format!(
                    "field {field:?} contains a reserved delimiter"
                )));
            }
        }
        if identity.id.is_empty() {
            return Err(ProtocolError::InvalidIdentity("empty id".into()));
        }
        Ok(identity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Delimiter-joined wire form: name, id, ip, port.
    pub fn to_wire_string(&self) -> String {
        [
            self.name.as_str(),
            self.id.as_str(),
            self.ip.as_str(),
            &self.port.to_string(),
        ]
        .join(IDENTITY_DELIMITER)
    }

    /// Content of a BEGIN_CONVERSATION_* message: name and id only.
    pub fn handshake_content(&self) -> String {
        format!("{}{}{}", self.name, HANDSHAKE_DELIMITER, self.id)
    }
}

/// Split BEGIN_CONVERSATION_* content into (name, id).
pub fn parse_handshake_content(content: &str) -> Result<(String, String), ProtocolError> {
    let mut parts = content.split(HANDSHAKE_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(id), None) if !id.is_empty() => Ok((name.to_string(), id.to_string())),
        _ => Err(ProtocolError::InvalidHandshake(content.to_string())),
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl FromStr for Identity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(IDENTITY_DELIMITER).collect();
        let [name, id, ip, port] = parts.as_slice() else {
            return Err(ProtocolError::InvalidIdentity(format!(
                "expected 4 fields, got {}",
                parts.len()
            )));
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| ProtocolError::InvalidIdentity(format!("bad port {port:?}: {e}")))?;
        Identity::new(*name, *id, *ip, port)
    }
}

impl TryFrom<String> for Identity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_wire_string()
    }
}

/// A peer we hold a socket to but whose name and id are not yet known.
///
/// Only the handshake can turn this into an [`Identity`]; until then the
/// placeholder id is `"ip:port"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    ip: String,
    port: u16,
}

impl PeerIdentity {
    pub fn unresolved(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    pub fn placeholder_id(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Identity used to address messages before the handshake completes.
    pub fn placeholder(&self) -> Identity {
        let id = self.placeholder_id();
        Identity {
            name: id.clone(),
            id,
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    /// Consume the placeholder, yielding the peer's declared identity.
    pub fn resolve(self, name: String, id: String) -> Result<Identity, ProtocolError> {
        Identity::new(name, id, self.ip, self.port)
    }
}
