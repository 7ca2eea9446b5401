//! Open sub-protocol: the holder makes a drawn slot public.
//!
//! The holder broadcasts its own unlock key. Every other replica already
//! peeled the remaining layers during the draw, so it checks the key against
//! the holder's commitment, peels the last layer and decodes. A slot that
//! fails to decode points at a dishonest holder or a broken lock. It is
//! reported as [`VerificationError::Undecodable`] and never resolved to a
//! wrong card.

use crate::{
    PlayerId, SlotIndex,
    card::Card,
    controller::{Controller, Verdict},
    deck::SlotStatus,
    error::{SequenceError, SessionError, VerificationError},
    keys::UnlockKey,
    message::Message,
    session::{CardRequest, Session, SessionEvent},
};

impl<C: Controller> Session<C> {
    /// Publicly opens `slot`, which this player must have drawn.
    ///
    /// The holder already knows the card, so the request resolves at once
    /// with the same value its draw produced; peers learn it when the
    /// announcement arrives.
    pub fn open(&mut self, slot: SlotIndex) -> CardRequest {
        let result = self.open_held(slot);
        if let Err(err) = &result {
            tracing::debug!(player = self.index(), slot, %err, "open refused");
        }
        CardRequest::resolved(slot, result)
    }

    fn open_held(&mut self, slot: SlotIndex) -> Result<Card, SessionError> {
        self.ensure_ready()?;
        let me = self.index();
        let err = self.out_of_range(slot);
        let key = self.keys.unlock_key(slot).ok_or_else(|| err.clone())?;
        let entry = self.deck.get_mut(slot).ok_or(err)?;

        match entry.status() {
            SlotStatus::Undrawn => return Err(SequenceError::NotDrawn { slot }.into()),
            SlotStatus::Opened { .. } => return Err(SequenceError::AlreadyOpened { slot }.into()),
            SlotStatus::Drawing { holder } | SlotStatus::Drawn { holder } if holder != me => {
                return Err(SequenceError::NotHolder { slot, holder }.into());
            },
            SlotStatus::Drawing { .. } => return Err(SequenceError::DrawInProgress { slot }.into()),
            SlotStatus::Drawn { .. } => {},
        }

        let value = entry.value().ok_or(VerificationError::Undecodable { slot })?;
        entry.mark_announced();
        entry.set_status(SlotStatus::Opened { holder: me, value });

        tracing::debug!(player = me, slot, value, "slot opened");
        self.broadcast(Message::OpenAnnounce { slot, key });
        self.controller.open(me, slot, value);
        Ok(Card { slot, value })
    }

    pub(crate) fn on_open_announce(
        &mut self,
        sender: PlayerId,
        slot: SlotIndex,
        key: UnlockKey,
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let err = self.out_of_range(slot);
        let entry = self.deck.get(slot).ok_or(err)?;

        let holder = match entry.status() {
            SlotStatus::Undrawn => return Err(SequenceError::NotDrawn { slot }.into()),
            SlotStatus::Opened { .. } => return Err(SequenceError::AlreadyOpened { slot }.into()),
            SlotStatus::Drawing { holder } | SlotStatus::Drawn { holder } => holder,
        };
        if holder != sender {
            return Err(SequenceError::NotHolder { slot, holder }.into());
        }
        if entry.announced() {
            return Err(SequenceError::AlreadyOpened { slot }.into());
        }
        let verified = entry.verify(sender, key);

        if self.controller.validate_open(sender, slot) == Verdict::Reject {
            return Err(self.reject(sender, slot, SessionError::Rejected { peer: sender, slot }));
        }
        let Some(verified) = verified else {
            let err = VerificationError::InvalidUnlockKey { slot, peer: sender };
            return Err(self.reject(sender, slot, err.into()));
        };

        if let Some(entry) = self.deck.get_mut(slot) {
            entry.remove_layer(sender, &verified);
            entry.mark_announced();
        }
        self.settle(slot)
    }

    /// Decodes an announced slot once its last layer is gone.
    pub(crate) fn try_finish_open(&mut self, slot: SlotIndex) -> Result<(), SessionError> {
        let me = self.index();
        let Some(entry) = self.deck.get_mut(slot) else {
            return Ok(());
        };
        let SlotStatus::Drawn { holder } = entry.status() else {
            return Ok(());
        };
        if !entry.announced() || !entry.layers().is_empty() {
            return Ok(());
        }

        let Some(value) = self.table.decode(&entry.point()) else {
            let err: SessionError = VerificationError::Undecodable { slot }.into();
            self.events.push_back(SessionEvent::Rejected {
                peer: holder,
                slot,
                error: err.clone(),
            });
            return Err(err);
        };
        entry.set_value(value);
        entry.set_status(SlotStatus::Opened { holder, value });

        tracing::debug!(player = me, slot, holder, value, "slot opened by peer");
        self.controller.open(holder, slot, value);
        Ok(())
    }
}
