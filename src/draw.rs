//! Draw sub-protocol: one player privately learns one slot.
//!
//! 1. The requester claims the slot and broadcasts `DrawRequest`.
//! 2. Every other player claims the slot for the requester, reveals its
//!    unlock key for that slot and broadcasts it as a `DrawShare`.
//! 3. Every replica checks each key against its lock commitment and peels
//!    that layer. The requester also runs `validate_draw` first.
//! 4. Once only the requester's layer remains, the requester peels its own
//!    layer locally, decodes the card and resolves its request.
//!
//! Shares are public, yet only the requester can remove the last layer.
//!
//! Transports only order messages per sender, so a share can overtake the
//! request it answers. Such shares are verified and stashed on the slot until
//! a claim makes them applicable. When two players claim the same slot
//! concurrently, the lower player id wins on every replica: the loser resolves
//! its request with [`SequenceError::AlreadyDrawn`] and shares its key with
//! the winner.

use futures::channel::oneshot;

use crate::{
    PlayerId, SlotIndex,
    card::Card,
    controller::{Controller, Verdict},
    deck::SlotStatus,
    error::{ProtocolError, SequenceError, SessionError, VerificationError},
    keys::UnlockKey,
    message::Message,
    session::{CardRequest, PendingRequest, Session},
};

impl<C: Controller> Session<C> {
    /// Privately draws `slot`.
    ///
    /// Resolves with the card once every other player's share has been
    /// verified. Resolves immediately with [`ProtocolError::NotReady`] before
    /// the deck is locked, or with a [`SequenceError`] if the slot is already
    /// claimed, drawn or opened. A concurrent claim by a lower player id also
    /// resolves it with [`SequenceError::AlreadyDrawn`]. A missing or invalid
    /// share leaves the request pending: there is no timeout at this layer.
    pub fn draw(&mut self, slot: SlotIndex) -> CardRequest {
        if let Err(err) = self.claim(slot) {
            tracing::debug!(player = self.index(), slot, %err, "draw refused");
            return CardRequest::resolved(slot, Err(err));
        }

        let (reply, rx) = oneshot::channel();
        self.pending.insert(slot, PendingRequest { reply });
        self.refresh_busy();

        tracing::debug!(player = self.index(), slot, "draw requested");
        self.broadcast(Message::DrawRequest { slot });
        self.replay_stashed(slot);
        CardRequest::new(slot, rx)
    }

    fn claim(&mut self, slot: SlotIndex) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let me = self.index();
        let err = self.out_of_range(slot);
        let entry = self.deck.get_mut(slot).ok_or(err)?;

        match entry.status() {
            SlotStatus::Undrawn => {
                entry.set_status(SlotStatus::Drawing { holder: me });
                Ok(())
            },
            SlotStatus::Opened { .. } => Err(SequenceError::AlreadyOpened { slot }.into()),
            SlotStatus::Drawing { holder } | SlotStatus::Drawn { holder } => {
                Err(SequenceError::AlreadyDrawn { slot, holder }.into())
            },
        }
    }

    pub(crate) fn on_draw_request(&mut self, sender: PlayerId, slot: SlotIndex) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let me = self.index();
        let err = self.out_of_range(slot);
        let status = self.deck.get(slot).ok_or(err)?.status();

        match status {
            SlotStatus::Undrawn => {},
            SlotStatus::Drawing { holder } if sender < holder => {
                tracing::debug!(player = me, slot, holder, winner = sender, "conflicting claim resolved");
                if holder == me {
                    self.concede(slot, sender);
                }
            },
            SlotStatus::Drawing { holder } if sender > holder => {
                tracing::debug!(player = me, slot, holder, loser = sender, "conflicting claim ignored");
                return Ok(());
            },
            SlotStatus::Opened { .. } => return Err(SequenceError::AlreadyOpened { slot }.into()),
            SlotStatus::Drawing { holder } | SlotStatus::Drawn { holder } => {
                return Err(SequenceError::AlreadyDrawn { slot, holder }.into());
            },
        }

        self.hand_over(slot, sender)
    }

    /// Drops our own claim on `slot` in favour of `winner`.
    fn concede(&mut self, slot: SlotIndex, winner: PlayerId) {
        if let Some(pending) = self.pending.remove(&slot) {
            let err = SequenceError::AlreadyDrawn { slot, holder: winner };
            let _ = pending.reply.send(Err(err.into()));
        }
        self.refresh_busy();
    }

    /// Records `holder` as the slot's requester, reveals our key unless an
    /// earlier claim already did, and applies shares that were waiting.
    fn hand_over(&mut self, slot: SlotIndex, holder: PlayerId) -> Result<(), SessionError> {
        let me = self.index();
        let err = self.out_of_range(slot);
        let key = self.keys.unlock_key(slot).ok_or_else(|| err.clone())?;
        let entry = self.deck.get_mut(slot).ok_or(err)?;

        entry.set_status(SlotStatus::Drawing { holder });
        if entry.layers().contains(&me) {
            let verified = entry
                .verify(me, key)
                .ok_or(VerificationError::InvalidUnlockKey { slot, peer: me })?;
            entry.remove_layer(me, &verified);

            tracing::debug!(player = me, slot, requester = holder, "sharing unlock key");
            self.broadcast(Message::DrawShare { slot, key });
        }

        self.replay_stashed(slot);
        self.settle(slot)
    }

    fn replay_stashed(&mut self, slot: SlotIndex) {
        let Some(entry) = self.deck.get_mut(slot) else {
            return;
        };
        for (sender, key) in entry.take_stashed() {
            if let Err(err) = self.on_draw_share(sender, slot, key) {
                tracing::debug!(player = self.index(), slot, sender, %err, "stashed share dropped");
            }
        }
    }

    pub(crate) fn on_draw_share(
        &mut self,
        sender: PlayerId,
        slot: SlotIndex,
        key: UnlockKey,
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let me = self.index();
        let err = self.out_of_range(slot);
        let entry = self.deck.get(slot).ok_or(err)?;

        let holder = match entry.status() {
            // No claim yet, or the sender is the current claimant and may
            // still concede to a lower id.
            SlotStatus::Undrawn => return self.stash_share(sender, slot, key),
            SlotStatus::Drawing { holder } if holder == sender => {
                return self.stash_share(sender, slot, key);
            },
            status => match status.holder() {
                Some(holder) if holder != sender => holder,
                _ => return Err(ProtocolError::UnexpectedShare { slot, sender }.into()),
            },
        };
        if !entry.layers().contains(&sender) {
            return Err(ProtocolError::DuplicateShare { slot, sender }.into());
        }
        let verified = entry.verify(sender, key);

        if holder == me && self.controller.validate_draw(sender, slot) == Verdict::Reject {
            return Err(self.reject(sender, slot, SessionError::Rejected { peer: sender, slot }));
        }
        let Some(verified) = verified else {
            let err = VerificationError::InvalidUnlockKey { slot, peer: sender };
            return Err(self.reject(sender, slot, err.into()));
        };

        if let Some(entry) = self.deck.get_mut(slot) {
            entry.remove_layer(sender, &verified);
        }
        tracing::debug!(player = me, slot, sender, holder, "share accepted");
        self.settle(slot)
    }

    fn stash_share(&mut self, sender: PlayerId, slot: SlotIndex, key: UnlockKey) -> Result<(), SessionError> {
        let Some(entry) = self.deck.get_mut(slot) else {
            return Err(self.out_of_range(slot).into());
        };
        if !entry.layers().contains(&sender) {
            return Err(ProtocolError::DuplicateShare { slot, sender }.into());
        }
        if entry.verify(sender, key).is_none() {
            let err = VerificationError::InvalidUnlockKey { slot, peer: sender };
            return Err(self.reject(sender, slot, err.into()));
        }
        if !entry.stash(sender, key) {
            return Err(ProtocolError::DuplicateShare { slot, sender }.into());
        }

        tracing::debug!(player = self.index(), slot, sender, "share stashed until claimed");
        Ok(())
    }

    /// Peels our own layer off a slot we drew and resolves the request.
    pub(crate) fn complete_draw(&mut self, slot: SlotIndex) {
        let me = self.index();
        let result = self.unlock_own(slot);

        match &result {
            Ok(card) => {
                tracing::debug!(player = me, slot, "draw complete");
                self.controller.draw(me, slot, card.value);
            },
            Err(err) => tracing::warn!(player = me, slot, %err, "draw failed"),
        }

        if let Some(pending) = self.pending.remove(&slot) {
            let _ = pending.reply.send(result);
        }
        self.refresh_busy();
    }

    fn unlock_own(&mut self, slot: SlotIndex) -> Result<Card, SessionError> {
        let me = self.index();
        let err = self.out_of_range(slot);
        let key = self.keys.unlock_key(slot).ok_or_else(|| err.clone())?;
        let entry = self.deck.get_mut(slot).ok_or(err)?;

        let verified = entry
            .verify(me, key)
            .ok_or(VerificationError::InvalidUnlockKey { slot, peer: me })?;
        entry.remove_layer(me, &verified);

        let value = self
            .table
            .decode(&entry.point())
            .ok_or(VerificationError::Undecodable { slot })?;
        entry.set_value(value);
        Ok(Card { slot, value })
    }
}
