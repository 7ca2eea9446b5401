//! Error taxonomy for the protocol engine.
//!
//! - [`ConfigError`]: rejected at construction, the only class that aborts
//!   immediately.
//! - [`ProtocolError`]: a message that does not fit the current state; absorbed
//!   and logged.
//! - [`SequenceError`]: an operation on a slot in the wrong lifecycle stage.
//! - [`VerificationError`]: a share or announcement that fails its check.
//! - [`ShuffleError`]: a malformed shuffle or lock step; fatal to the session.

use thiserror::Error;

use crate::{PlayerId, SlotIndex, session::SessionState};

/// Invalid construction parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Deck size outside `[1, max]`
    #[error("card count {got} out of range, expected 1..={max}")]
    CardCount {
        /// Requested deck size
        got: usize,
        /// Largest supported deck
        max: usize,
    },

    /// Fewer than two players
    #[error("at least 2 players are required, got {0}")]
    PlayerCount(usize),

    /// Own index does not name a seat at the table
    #[error("player index {index} out of range for {player_count} players")]
    PlayerIndex {
        /// Configured index
        index: PlayerId,
        /// Configured table size
        player_count: usize,
    },

    /// The card table derived from the context is not injective
    #[error("card table maps value {value} to a degenerate point")]
    DegenerateCardTable {
        /// First value whose point collided or was the identity
        value: usize,
    },
}

/// Inbound message inconsistent with the session's state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Draw/open traffic before the locked deck exists, or after an abort
    #[error("not ready for slot traffic in state {state:?}")]
    NotReady {
        /// State when the message arrived
        state: SessionState,
    },

    /// Slot index outside the deck
    #[error("slot {slot} out of range for deck of {card_count}")]
    SlotOutOfRange {
        /// Offending slot
        slot: SlotIndex,
        /// Deck size
        card_count: usize,
    },

    /// Sender is not a peer of this session
    #[error("message from unknown sender {sender}")]
    UnknownSender {
        /// Claimed sender
        sender: PlayerId,
    },

    /// Shuffle or lock step outside the coordinator's schedule
    #[error("unexpected {pass} step from player {sender}")]
    UnexpectedStep {
        /// Pass the step belongs to
        pass: &'static str,
        /// Player who sent it
        sender: PlayerId,
    },

    /// Share for a slot nobody requested, or from the slot's own holder
    #[error("unexpected share for slot {slot} from player {sender}")]
    UnexpectedShare {
        /// Target slot
        slot: SlotIndex,
        /// Contributing player
        sender: PlayerId,
    },

    /// Second share from the same player for the same slot
    #[error("duplicate share for slot {slot} from player {sender}")]
    DuplicateShare {
        /// Target slot
        slot: SlotIndex,
        /// Contributing player
        sender: PlayerId,
    },
}

/// Slot operation in the wrong lifecycle stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// Slot already claimed or drawn
    #[error("slot {slot} already drawn by player {holder}")]
    AlreadyDrawn {
        /// Target slot
        slot: SlotIndex,
        /// Player holding the slot
        holder: PlayerId,
    },

    /// Open requested for a slot nobody has drawn
    #[error("slot {slot} has not been drawn")]
    NotDrawn {
        /// Target slot
        slot: SlotIndex,
    },

    /// Open requested while the draw is still collecting shares
    #[error("slot {slot} is still being drawn")]
    DrawInProgress {
        /// Target slot
        slot: SlotIndex,
    },

    /// Slot already publicly opened
    #[error("slot {slot} already opened")]
    AlreadyOpened {
        /// Target slot
        slot: SlotIndex,
    },

    /// Only the holder may open a slot
    #[error("slot {slot} is held by player {holder}")]
    NotHolder {
        /// Target slot
        slot: SlotIndex,
        /// Player holding the slot
        holder: PlayerId,
    },
}

/// Contribution that failed its cryptographic check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// Unlock key does not match the commitment published at lock time
    #[error("unlock key from player {peer} does not match its commitment for slot {slot}")]
    InvalidUnlockKey {
        /// Target slot
        slot: SlotIndex,
        /// Contributing player
        peer: PlayerId,
    },

    /// Fully unlocked slot is not a card of this deck
    #[error("slot {slot} does not decode to a card")]
    Undecodable {
        /// Target slot
        slot: SlotIndex,
    },
}

/// Malformed shuffle or lock step. Fatal: the locked deck cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShuffleError {
    /// Deck of the wrong size
    #[error("player {sender} sent a deck of {actual} slots, expected {expected}")]
    WrongSize {
        /// Player who sent the step
        sender: PlayerId,
        /// Deck size
        expected: usize,
        /// Received size
        actual: usize,
    },

    /// Point repeated within the deck
    #[error("player {sender} sent a deck with a duplicate point at slot {slot}")]
    DuplicatePoint {
        /// Player who sent the step
        sender: PlayerId,
        /// Second occurrence
        slot: SlotIndex,
    },

    /// Point at infinity within the deck
    #[error("player {sender} sent the identity point at slot {slot}")]
    IdentityPoint {
        /// Player who sent the step
        sender: PlayerId,
        /// Offending slot
        slot: SlotIndex,
    },

    /// Lock step whose commitments do not cover the deck
    #[error("player {sender} sent {actual} lock commitments, expected {expected}")]
    CommitmentCount {
        /// Player who sent the step
        sender: PlayerId,
        /// Deck size
        expected: usize,
        /// Received count
        actual: usize,
    },

    /// Commitment to a zero lock key
    #[error("player {sender} committed to the identity at slot {slot}")]
    IdentityCommitment {
        /// Player who sent the step
        sender: PlayerId,
        /// Offending slot
        slot: SlotIndex,
    },
}

/// Any failure surfaced by a [`Session`](crate::Session).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Construction-time misconfiguration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Message inconsistent with the current state
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Slot in the wrong lifecycle stage
    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// Failed cryptographic check
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Broken shuffle
    #[error("shuffle error: {0}")]
    Shuffle(#[from] ShuffleError),

    /// Controller hook refused a contribution
    #[error("controller rejected contribution from player {peer} for slot {slot}")]
    Rejected {
        /// Contributing player
        peer: PlayerId,
        /// Target slot
        slot: SlotIndex,
    },

    /// Session dropped before the request resolved
    #[error("session dropped before the request resolved")]
    Cancelled,
}
