//! Channel handshake payloads and validation.
//!
//! Client -> directory: `HANDSHAKE`, answered by `DN_HANDSHAKE`.
//! Peer <-> peer (direct): both sides send `HANDSHAKE` symmetrically;
//! a `DN_HANDSHAKE` from a non-directory peer is a protocol violation.

use crate::foundation::{CoinjoinError, Result, PROTO_VERSION, PROTO_VERSION_MIN};
use crate::infrastructure::message::envelope::{Envelope, EnvelopeType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeHello {
    pub nick: String,
    pub network: String,
    pub directory: bool,
    #[serde(rename = "proto-ver")]
    pub proto_ver: u8,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(rename = "location-string")]
    pub location_string: String,
}

impl HandshakeHello {
    pub fn new(nick: &str, network: &str, location: &str, features: BTreeMap<String, bool>) -> Self {
        Self {
            nick: nick.to_string(),
            network: network.to_string(),
            directory: false,
            proto_ver: PROTO_VERSION,
            features,
            location_string: location.to_string(),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(EnvelopeType::Handshake, serde_json::to_string(self)?))
    }

    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|err| CoinjoinError::HandshakeRejected(format!("bad hello: {err}")))
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub nick: String,
    pub network: String,
    pub directory: bool,
    #[serde(rename = "proto-ver-min")]
    pub proto_ver_min: u8,
    #[serde(rename = "proto-ver-max")]
    pub proto_ver_max: u8,
    pub accepted: bool,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl HandshakeReply {
    pub fn accepting(nick: &str, network: &str, features: BTreeMap<String, bool>) -> Self {
        Self {
            nick: nick.to_string(),
            network: network.to_string(),
            directory: true,
            proto_ver_min: PROTO_VERSION_MIN,
            proto_ver_max: PROTO_VERSION,
            accepted: true,
            features,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(EnvelopeType::DnHandshake, serde_json::to_string(self)?))
    }

    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|err| CoinjoinError::HandshakeRejected(format!("bad reply: {err}")))
    }
}

/// Validate a directory's reply to our hello.
pub fn validate_directory_reply(reply: &HandshakeReply) -> Result<()> {
    if !reply.directory {
        return Err(CoinjoinError::ProtocolViolation("DN_HANDSHAKE from a non-directory peer".into()));
    }
    if !reply.accepted {
        return Err(CoinjoinError::HandshakeRejected("directory rejected handshake".into()));
    }
    if PROTO_VERSION < reply.proto_ver_min || PROTO_VERSION > reply.proto_ver_max {
        return Err(CoinjoinError::HandshakeRejected(format!(
            "protocol version {} outside [{}, {}]",
            PROTO_VERSION, reply.proto_ver_min, reply.proto_ver_max
        )));
    }
    Ok(())
}

/// Validate the hello a direct peer sent us. Directs never claim to be
/// directories.
pub fn validate_peer_hello(hello: &HandshakeHello) -> Result<()> {
    if hello.directory {
        return Err(CoinjoinError::ProtocolViolation("direct peer claims to be a directory".into()));
    }
    if hello.proto_ver != PROTO_VERSION {
        return Err(CoinjoinError::HandshakeRejected(format!("peer protocol version {}", hello.proto_ver)));
    }
    Ok(())
}
