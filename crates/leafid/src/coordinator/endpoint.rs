use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Payload of an instance's coordination node.
///
/// The port is carried as a string to stay compatible with nodes written by
/// other implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: String,
    /// Unix milliseconds of the last registration or heartbeat.
    pub timestamp: i64,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16, timestamp: i64) -> Self {
        Self {
            ip: ip.into(),
            port: port.to_string(),
            timestamp,
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if `payload` is not an endpoint.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Node name under the forever path: `<ip:port>-<10-digit worker id>`.
pub fn node_name(address: &str, worker_id: i64) -> String {
    format!("{address}-{worker_id:010}")
}

/// Splits a node name into its address and worker id.
///
/// # Errors
///
/// Returns [`Error::InvalidNodeName`] if the name has no `-` separator or
/// the suffix is not a non-negative integer.
pub fn parse_node_name(name: &str) -> Result<(&str, i64)> {
    let invalid = || Error::InvalidNodeName(name.to_owned());
    let (address, suffix) = name.rsplit_once('-').ok_or_else(invalid)?;
    if address.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let worker_id = suffix.parse().map_err(|_| invalid())?;
    Ok((address, worker_id))
}
