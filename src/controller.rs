//! Application checkpoints invoked during draw and open.
//!
//! Hooks observe and gate contributions; they never change what the
//! cryptography accepts. A rejected contribution is discarded exactly like one
//! that failed verification, and the request waits for a valid resend.

use crate::{PlayerId, SlotIndex};

/// Outcome of a validation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject,
}

/// Hook table supplied by the embedding application.
///
/// Every method has a default, so implementors override only the checkpoints
/// they care about.
///
/// The validation hooks run before the contributed key is checked against
/// its commitment. A key that then fails the check is not passed back to the
/// controller: the session queues a
/// [`SessionEvent::Rejected`](crate::SessionEvent::Rejected) carrying a
/// [`VerificationError`](crate::VerificationError) for that peer and slot, and
/// the request keeps waiting.
pub trait Controller {
    /// A draw share from `peer` for `slot` arrived at its requester.
    fn validate_draw(&mut self, _peer: PlayerId, _slot: SlotIndex) -> Verdict {
        Verdict::Allow
    }

    /// This player finished drawing `slot`. `peer` is this player.
    fn draw(&mut self, _peer: PlayerId, _slot: SlotIndex, _value: usize) {}

    /// The holder `peer` announced its unlock key for `slot`. Runs on every
    /// other replica.
    fn validate_open(&mut self, _peer: PlayerId, _slot: SlotIndex) -> Verdict {
        Verdict::Allow
    }

    /// `slot`, held by `peer`, is now publicly opened.
    fn open(&mut self, _peer: PlayerId, _slot: SlotIndex, _value: usize) {}
}

/// Controller that allows everything and records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopController;

impl Controller for NoopController {}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn validate_draw(&mut self, peer: PlayerId, slot: SlotIndex) -> Verdict {
        (**self).validate_draw(peer, slot)
    }

    fn draw(&mut self, peer: PlayerId, slot: SlotIndex, value: usize) {
        (**self).draw(peer, slot, value)
    }

    fn validate_open(&mut self, peer: PlayerId, slot: SlotIndex) -> Verdict {
        (**self).validate_open(peer, slot)
    }

    fn open(&mut self, peer: PlayerId, slot: SlotIndex, value: usize) {
        (**self).open(peer, slot, value)
    }
}
