//! Deck model: the locked deck and per-slot layer bookkeeping.
//!
//! Every replica holds its own copy. Layers only ever come off: a slot starts
//! covered by every player's lock and each verified unlock key removes exactly
//! one of them.

use std::collections::{BTreeMap, BTreeSet};

use ark_serialize::CanonicalSerialize;
use sha2::{Digest, Sha256};

use crate::{
    CurveAffine, PlayerId, SlotIndex,
    keys::{LockCommitment, UnlockKey, Verified},
};

/// Lifecycle of one slot. Each transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// Nobody has asked for this slot
    Undrawn,
    /// `holder` requested it; shares are still arriving
    Drawing { holder: PlayerId },
    /// Every layer except the holder's has been removed
    Drawn { holder: PlayerId },
    /// The holder's layer is gone too; `value` is public
    Opened { holder: PlayerId, value: usize },
}

impl SlotStatus {
    #[must_use]
    pub fn holder(&self) -> Option<PlayerId> {
        match *self {
            Self::Undrawn => None,
            Self::Drawing { holder } | Self::Drawn { holder } | Self::Opened { holder, .. } => {
                Some(holder)
            },
        }
    }
}

/// One physical deck position as seen by this replica.
#[derive(Debug, Clone)]
pub struct EncryptedSlot {
    locked: CurveAffine,
    point: CurveAffine,
    layers: BTreeSet<PlayerId>,
    commitments: Vec<LockCommitment>,
    status: SlotStatus,
    value: Option<usize>,
    announced: bool,
    stashed: BTreeMap<PlayerId, UnlockKey>,
}

impl EncryptedSlot {
    fn new(locked: CurveAffine, commitments: Vec<LockCommitment>) -> Self {
        Self {
            locked,
            point: locked,
            layers: (0..commitments.len()).collect(),
            commitments,
            status: SlotStatus::Undrawn,
            value: None,
            announced: false,
            stashed: BTreeMap::new(),
        }
    }

    /// Value fixed by the shuffle coordinator.
    #[must_use]
    pub fn locked_point(&self) -> CurveAffine {
        self.locked
    }

    /// Current value with every removed layer peeled off.
    #[must_use]
    pub fn point(&self) -> CurveAffine {
        self.point
    }

    /// Players whose layer still covers this slot.
    #[must_use]
    pub fn layers(&self) -> &BTreeSet<PlayerId> {
        &self.layers
    }

    #[must_use]
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// Card value, once this replica has recovered it.
    #[must_use]
    pub fn value(&self) -> Option<usize> {
        self.value
    }

    #[must_use]
    pub fn commitment(&self, player: PlayerId) -> Option<&LockCommitment> {
        self.commitments.get(player)
    }

    /// Checks `key` against `player`'s commitment for this slot.
    pub(crate) fn verify(&self, player: PlayerId, key: UnlockKey) -> Option<Verified<UnlockKey>> {
        key.verify(self.commitments.get(player)?)
    }

    /// Peels `player`'s layer. Returns `false` if it was already gone.
    pub(crate) fn remove_layer(&mut self, player: PlayerId, key: &Verified<UnlockKey>) -> bool {
        if !self.layers.remove(&player) {
            return false;
        }
        self.point = key.unlock(self.point);
        true
    }

    pub(crate) fn set_status(&mut self, status: SlotStatus) {
        self.status = status;
    }

    pub(crate) fn set_value(&mut self, value: usize) {
        self.value = Some(value);
    }

    pub(crate) fn announced(&self) -> bool {
        self.announced
    }

    pub(crate) fn mark_announced(&mut self) {
        self.announced = true;
    }

    /// Holds a verified share that cannot be applied under the current
    /// claim. Returns `false` if `player` already has one waiting.
    pub(crate) fn stash(&mut self, player: PlayerId, key: UnlockKey) -> bool {
        if self.stashed.contains_key(&player) {
            return false;
        }
        self.stashed.insert(player, key);
        true
    }

    pub(crate) fn take_stashed(&mut self) -> BTreeMap<PlayerId, UnlockKey> {
        std::mem::take(&mut self.stashed)
    }

    #[cfg(test)]
    pub(crate) fn tamper(&mut self, point: CurveAffine) {
        self.point = point;
    }
}

/// The ordered sequence of encrypted slots. Empty until the shuffle
/// coordinator locks it; never reshuffled afterwards.
#[derive(Debug, Clone, Default)]
pub struct Deck {
    slots: Vec<EncryptedSlot>,
}

impl Deck {
    const SERIALIZE_BUFFER_SIZE: usize = 64;
    const FINGERPRINT_DST: &'static [u8] = b"dealerless/DECK/v1";

    /// Builds the locked deck. `commitments[player][slot]` is `player`'s lock
    /// commitment for `slot`.
    pub(crate) fn locked(points: Vec<CurveAffine>, commitments: &[Vec<LockCommitment>]) -> Self {
        let slots = points
            .into_iter()
            .enumerate()
            .map(|(slot, point)| {
                let per_player = commitments.iter().map(|c| c[slot]).collect();
                EncryptedSlot::new(point, per_player)
            })
            .collect();
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, slot: SlotIndex) -> Option<&EncryptedSlot> {
        self.slots.get(slot)
    }

    pub(crate) fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut EncryptedSlot> {
        self.slots.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncryptedSlot> {
        self.slots.iter()
    }

    /// SHA-256 over the canonical encoding of every locked point and lock
    /// commitment. Honest replicas of one table agree on it.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(Self::FINGERPRINT_DST);
        h.update(self.slots.len().to_be_bytes());
        for (i, slot) in self.slots.iter().enumerate() {
            h.update(i.to_be_bytes());
            Self::update_with_serialized(&mut h, &slot.locked);
            for c in &slot.commitments {
                Self::update_with_serialized(&mut h, &c.0);
            }
        }
        h.finalize().into()
    }

    fn update_with_serialized<T: CanonicalSerialize>(h: &mut Sha256, t: &T) {
        let mut serialize_buffer = [0u8; Self::SERIALIZE_BUFFER_SIZE];
        let serialized_size = t.compressed_size();
        assert!(
            serialized_size <= Self::SERIALIZE_BUFFER_SIZE,
            "serialize buffer too small: {serialized_size} > {}",
            Self::SERIALIZE_BUFFER_SIZE
        );
        t.serialize_compressed(&mut serialize_buffer[..serialized_size])
            .expect("infallible serialization");
        h.update(serialized_size.to_be_bytes());
        h.update(&serialize_buffer[..serialized_size]);
    }
}
