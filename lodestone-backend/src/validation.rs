/// Startup validation of the server roster
use crate::roster::{ServerId, ServerRegistration};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read roster file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse roster file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Roster must contain at least one server")]
    Empty,

    #[error("Server {0} has an empty name")]
    ServerNameEmpty(ServerId),

    #[error("Server {0} has an empty ip")]
    ServerIpEmpty(ServerId),

    #[error("Server id {0} is used more than once")]
    DuplicateId(ServerId),

    #[error("Server {ip}:{port} is registered more than once")]
    DuplicateAddress { ip: String, port: String },
}

/// Validates a single registration
///
/// Rules:
/// - Name cannot be blank
/// - Ip cannot be blank
///
/// The `type` tag is deliberately not checked here; an unsupported family
/// is reported when the cycle is dispatched.
pub fn validate_server(server: &ServerRegistration) -> Result<(), RosterError> {
    if server.name.trim().is_empty() {
        return Err(RosterError::ServerNameEmpty(server.id));
    }

    if server.ip.trim().is_empty() {
        return Err(RosterError::ServerIpEmpty(server.id));
    }

    Ok(())
}

/// Validates a whole roster
///
/// Rules:
/// - At least one server
/// - Each server must be valid
/// - Ids are unique
/// - The same ip and port pair is not registered twice
pub fn validate_roster(servers: &[ServerRegistration]) -> Result<(), RosterError> {
    if servers.is_empty() {
        return Err(RosterError::Empty);
    }

    let mut ids = HashSet::with_capacity(servers.len());
    let mut addresses = HashSet::with_capacity(servers.len());

    for server in servers {
        validate_server(server)?;

        if !ids.insert(server.id) {
            return Err(RosterError::DuplicateId(server.id));
        }

        let port = server
            .port
            .map(|port| port.to_string())
            .unwrap_or_else(|| "default".to_string());
        if !addresses.insert((server.ip.to_ascii_lowercase(), port.clone())) {
            return Err(RosterError::DuplicateAddress {
                ip: server.ip.clone(),
                port,
            });
        }
    }

    Ok(())
}
