//! The fixed set of servers pinged every cycle.
//!
//! A roster is loaded once at startup and never mutated afterwards. The only
//! interior state is each server's protocol version pointer, which rotates
//! one step per cycle.

use crate::error::DispatchError;
use crate::validation::{self, RosterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stable identifier of a server, also its key in update batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Supported game server families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edition {
    Java,
    Bedrock,
}

impl Edition {
    /// Parse a roster `type` tag ("PC"/"java" or "PE"/"bedrock").
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "pc" | "java" => Some(Edition::Java),
            "pe" | "bedrock" => Some(Edition::Bedrock),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Edition::Java => 25565,
            Edition::Bedrock => 19132,
        }
    }
}

/// A protocol version advertised to a server when pinging it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolVersion {
    pub protocol_id: i32,
    pub name: String,
}

/// One registered server.
#[derive(Debug)]
pub struct ServerRegistration {
    pub id: ServerId,
    pub name: String,
    pub ip: String,
    pub port: Option<u16>,
    /// Raw family tag, checked when a cycle is dispatched.
    pub kind: String,
    /// Query the third-party status API instead of the server itself.
    pub api: bool,
    pub protocol_versions: Vec<ProtocolVersion>,
    next_version: AtomicUsize,
}

impl ServerRegistration {
    pub fn new(id: ServerId, name: impl Into<String>, ip: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ip: ip.into(),
            port: None,
            kind: kind.into(),
            api: false,
            protocol_versions: Vec::new(),
            next_version: AtomicUsize::new(0),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_api(mut self, api: bool) -> Self {
        self.api = api;
        self
    }

    pub fn with_protocol_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.protocol_versions = versions;
        self
    }

    pub fn edition(&self) -> Result<Edition, DispatchError> {
        Edition::parse(&self.kind).ok_or_else(|| DispatchError::UnsupportedEdition {
            server: self.id,
            ip: self.ip.clone(),
            kind: self.kind.clone(),
        })
    }

    /// Configured port, or the edition's default.
    pub fn port_or_default(&self, edition: Edition) -> u16 {
        self.port.unwrap_or(edition.default_port())
    }

    /// Advance the version pointer and return the version to advertise.
    ///
    /// Bedrock has no protocol version handshake, so it never gets one.
    pub fn next_protocol_version(&self) -> Option<&ProtocolVersion> {
        if self.protocol_versions.is_empty() || Edition::parse(&self.kind) == Some(Edition::Bedrock) {
            return None;
        }
        let index = self.next_version.fetch_add(1, Ordering::Relaxed) % self.protocol_versions.len();
        self.protocol_versions.get(index)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterFile {
    servers: Vec<ServerEntry>,
    /// Version candidates keyed by family tag
    #[serde(default)]
    protocol_versions: HashMap<String, Vec<ProtocolVersion>>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    name: String,
    ip: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    api: bool,
}

/// The immutable list of registered servers.
#[derive(Debug)]
pub struct Roster {
    servers: Vec<Arc<ServerRegistration>>,
    index: HashMap<ServerId, usize>,
}

impl Roster {
    /// Build a roster from registrations, validating it.
    pub fn new(servers: Vec<ServerRegistration>) -> Result<Self, RosterError> {
        validation::validate_roster(&servers)?;
        let index = servers
            .iter()
            .enumerate()
            .map(|(position, server)| (server.id, position))
            .collect();
        Ok(Self {
            servers: servers.into_iter().map(Arc::new).collect(),
            index,
        })
    }

    /// Parse a roster file. Server ids are positions in the `servers` list.
    pub fn from_json(json: &str) -> Result<Self, RosterError> {
        let file: RosterFile = serde_json::from_str(json)?;
        let servers = file
            .servers
            .into_iter()
            .enumerate()
            .map(|(position, entry)| {
                let versions = file
                    .protocol_versions
                    .iter()
                    .find(|(kind, _)| kind.eq_ignore_ascii_case(&entry.kind))
                    .map(|(_, versions)| versions.clone())
                    .unwrap_or_default();
                let registration = ServerRegistration::new(
                    ServerId(position as u32),
                    entry.name,
                    entry.ip,
                    entry.kind,
                )
                .with_api(entry.api)
                .with_protocol_versions(versions);
                match entry.port {
                    Some(port) => registration.with_port(port),
                    None => registration,
                }
            })
            .collect();
        Self::new(servers)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn get(&self, id: ServerId) -> Option<&Arc<ServerRegistration>> {
        self.index.get(&id).and_then(|position| self.servers.get(*position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServerRegistration>> {
        self.servers.iter()
    }
}
