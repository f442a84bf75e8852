//! Session records and the phase state machines on both sides of a run.
//!
//! Phase cursors only ever move forward; a message that would move one
//! backwards or sideways sends the session to a terminal state instead.

use crate::foundation::{CoinjoinError, Hash32, Nick, Result};
use serde::{Deserialize, Serialize};

/// Run-level phases on the taker side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TakerPhase {
    #[default]
    Idle = 0,
    Discover = 1,
    Fill = 2,
    Auth = 3,
    TxBuild = 4,
    Sign = 5,
    Broadcast = 6,
    Done = 7,
    Aborted = 8,
}

impl TakerPhase {
    pub fn can_transition_to(self, target: TakerPhase) -> bool {
        use TakerPhase::*;
        if self.is_terminal() {
            return false;
        }
        if target == Aborted {
            return true;
        }
        matches!(
            (self, target),
            (Idle, Discover)
                | (Discover, Fill)
                | (Fill, Auth)
                | (Auth, TxBuild)
                | (TxBuild, Sign)
                | (Sign, Broadcast)
                | (Broadcast, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TakerPhase::Done | TakerPhase::Aborted)
    }

    /// Phase label used in failure reports.
    pub fn label(self) -> &'static str {
        match self {
            TakerPhase::Idle => "IDLE",
            TakerPhase::Discover => "DISCOVER",
            TakerPhase::Fill => "FILL",
            TakerPhase::Auth => "AUTH",
            TakerPhase::TxBuild => "TX_BUILD",
            TakerPhase::Sign => "SIGN",
            TakerPhase::Broadcast => "BROADCAST",
            TakerPhase::Done => "DONE",
            TakerPhase::Aborted => "ABORTED",
        }
    }
}

/// Per-session phases on the maker side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MakerPhase {
    #[default]
    Idle = 0,
    Filled = 1,
    Authed = 2,
    Signed = 3,
    Done = 4,
    Aborted = 5,
    TimedOut = 6,
}

impl MakerPhase {
    pub fn can_transition_to(self, target: MakerPhase) -> bool {
        use MakerPhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(target, Aborted | TimedOut) {
            return true;
        }
        matches!((self, target), (Idle, Filled) | (Filled, Authed) | (Authed, Signed) | (Signed, Done))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MakerPhase::Done | MakerPhase::Aborted | MakerPhase::TimedOut)
    }

    pub fn label(self) -> &'static str {
        match self {
            MakerPhase::Idle => "IDLE",
            MakerPhase::Filled => "FILLED",
            MakerPhase::Authed => "AUTHED",
            MakerPhase::Signed => "SIGNED",
            MakerPhase::Done => "DONE",
            MakerPhase::Aborted => "ABORTED",
            MakerPhase::TimedOut => "TIMED_OUT",
        }
    }
}

/// State shared by taker-side and maker-side sessions: the counterparty,
/// this session's box keypair, the peer's box key once learned, the
/// channel the session is pinned to, and timeout bookkeeping.
#[derive(Clone, Debug)]
pub struct SessionCore {
    pub counterparty: Nick,
    pub box_secret: [u8; 32],
    pub box_public: [u8; 32],
    pub their_box_public: Option<[u8; 32]>,
    pub commitment: Option<Hash32>,
    /// Hostid of the transport the first encrypted message used. All
    /// later traffic for the session must arrive the same way.
    pub pinned_channel: Option<String>,
    pub created_at: u64,
    pub podle_index: u8,
}

impl SessionCore {
    pub fn new(counterparty: Nick, box_secret: [u8; 32], box_public: [u8; 32], created_at: u64) -> Self {
        Self {
            counterparty,
            box_secret,
            box_public,
            their_box_public: None,
            commitment: None,
            pinned_channel: None,
            created_at,
            podle_index: 0,
        }
    }

    pub fn is_expired(&self, now: u64, timeout_secs: u64) -> bool {
        now.saturating_sub(self.created_at) >= timeout_secs
    }

    /// Enforce channel consistency: the first encrypted message pins the
    /// transport, later mismatches are protocol violations.
    pub fn pin_channel(&mut self, hostid: &str) -> Result<()> {
        match &self.pinned_channel {
            None => {
                self.pinned_channel = Some(hostid.to_string());
                Ok(())
            }
            Some(pinned) if pinned == hostid => Ok(()),
            Some(pinned) => {
                Err(CoinjoinError::ChannelInconsistent { pinned: pinned.clone(), actual: hostid.to_string() })
            }
        }
    }

    pub fn their_box_public(&self) -> Result<[u8; 32]> {
        self.their_box_public.ok_or_else(|| {
            CoinjoinError::SessionAborted {
                nick: self.counterparty.to_string(),
                reason: "counterparty box key not yet known".into(),
            }
        })
    }
}
