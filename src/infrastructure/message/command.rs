//! Application payload grammar inside envelope lines.
//!
//! Shape: `{from_nick}!{to_nick}!{command} [args...]` with single-space
//! separators; fields are never split on runs of whitespace. Private
//! messages additionally carry `<from_pubkey> <signature>` as the last
//! two tokens, signed over the hostid-bound plaintext.

use crate::domain::nick::{self, NickIdentity};
use crate::foundation::{CoinjoinError, Nick, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppMessage {
    pub from: Nick,
    pub to: Nick,
    pub command: String,
    pub args: String,
}

impl AppMessage {
    pub fn new(from: Nick, to: Nick, command: impl Into<String>, args: impl Into<String>) -> Self {
        Self { from, to, command: command.into(), args: args.into() }
    }

    /// `from!to!command args` (no signature).
    pub fn format(&self) -> String {
        if self.args.is_empty() {
            format!("{}!{}!{}", self.from, self.to, self.command)
        } else {
            format!("{}!{}!{} {}", self.from, self.to, self.command, self.args)
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.splitn(3, '!');
        let (Some(from), Some(to), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CoinjoinError::MalformedCommand(format!("payload missing '!' separators: {line}")));
        };
        if from.is_empty() || to.is_empty() || rest.is_empty() {
            return Err(CoinjoinError::MalformedCommand(format!("payload has empty fields: {line}")));
        }
        let (command, args) = match rest.split_once(' ') {
            Some((command, args)) => (command, args),
            None => (rest, ""),
        };
        Ok(Self::new(Nick::new(from), Nick::new(to), command, args))
    }
}

/// Render a signed private payload for the given channel hostid.
pub fn format_signed(msg: &AppMessage, identity: &NickIdentity, hostid: &str) -> String {
    let signature = identity.sign_message(hostid, &msg.command, &msg.args);
    format!("{} {} {}", msg.format(), identity.pubkey_hex(), signature)
}

/// Parse and authenticate a signed private payload received via the
/// channel identified by `hostid`. The pubkey must hash to the claimed
/// sender nick and the signature must cover this channel's hostid.
pub fn parse_signed(line: &str, hostid: &str) -> Result<AppMessage> {
    let mut tail = line.rsplitn(3, ' ');
    let (Some(signature), Some(pubkey), Some(head)) = (tail.next(), tail.next(), tail.next()) else {
        return Err(CoinjoinError::MalformedCommand(format!("signed payload too short: {line}")));
    };
    let msg = AppMessage::parse(head)?;
    nick::verify_message(&msg.from, pubkey, signature, hostid, &msg.command, &msg.args)?;
    Ok(msg)
}
