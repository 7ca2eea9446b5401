use ark_ec::CurveGroup;
use ark_ff::{Field, UniformRand};
use ark_std::rand::RngCore as Rng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CurveAffine, CurveProj, GENERATOR, Scalar, SlotIndex};

/// Wrapper type indicating that a value has been cryptographically verified.
///
/// Values can only be constructed through successful verification, so code
/// that peels a layer off a slot cannot be handed an unchecked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified<T>(T);

impl<T> Verified<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Public image `k·G` of one player's lock key for one slot.
///
/// Published with the lock step, it is what an [`UnlockKey`] is later checked
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockCommitment(pub(crate) CurveAffine);

impl LockCommitment {
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.0 == CurveAffine::identity()
    }
}

/// One player's lock scalar for one slot, revealed to remove that player's
/// layer.
///
/// A revealed key is worthless for any other slot: each slot is locked under
/// an independent scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockKey(pub(crate) Scalar);

impl UnlockKey {
    /// Checks the key against the commitment its owner published at lock
    /// time.
    ///
    /// Returns `None` if `k·G` does not match, or if the key is zero and thus
    /// cannot be inverted.
    #[must_use]
    pub fn verify(self, commitment: &LockCommitment) -> Option<Verified<UnlockKey>> {
        self.0.inverse()?;
        ((GENERATOR * self.0).into_affine() == commitment.0).then_some(Verified(self))
    }
}

impl Verified<UnlockKey> {
    /// Removes this key's layer from `point`.
    pub(crate) fn unlock(&self, point: CurveAffine) -> CurveAffine {
        // verified keys are invertible
        match self.0.0.inverse() {
            Some(inv) => (point * inv).into_affine(),
            None => CurveAffine::identity(),
        }
    }
}

/// Secret scalars held by one player. Memory is wiped on drop.
///
/// `shuffle` is the long-lived layer applied during the shuffle pass and
/// removed again during the lock pass; `locks[i]` is the per-slot layer that
/// stays on slot `i` until the player reveals it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyMaterial {
    shuffle: Scalar,
    shuffle_inv: Scalar,
    locks: Vec<Scalar>,
}

impl KeyMaterial {
    pub(crate) fn generate<R: Rng>(rng: &mut R) -> Self {
        let (shuffle, shuffle_inv) = invertible_scalar(rng);
        Self {
            shuffle,
            shuffle_inv,
            locks: Vec::new(),
        }
    }

    pub(crate) fn shuffle_key(&self) -> Scalar {
        self.shuffle
    }

    pub(crate) fn shuffle_key_inverse(&self) -> Scalar {
        self.shuffle_inv
    }

    /// Draws one lock scalar per slot and returns their commitments.
    pub(crate) fn generate_locks<R: Rng>(
        &mut self,
        rng: &mut R,
        card_count: usize,
    ) -> Vec<LockCommitment> {
        self.locks.zeroize();
        self.locks = (0..card_count).map(|_| invertible_scalar(rng).0).collect();

        let projs: Vec<CurveProj> = self.locks.iter().map(|k| GENERATOR * k).collect();
        CurveProj::normalize_batch(&projs)
            .into_iter()
            .map(LockCommitment)
            .collect()
    }

    pub(crate) fn locks(&self) -> &[Scalar] {
        &self.locks
    }

    pub(crate) fn unlock_key(&self, slot: SlotIndex) -> Option<UnlockKey> {
        self.locks.get(slot).copied().map(UnlockKey)
    }
}

fn invertible_scalar<R: Rng>(rng: &mut R) -> (Scalar, Scalar) {
    loop {
        let s = Scalar::rand(rng);
        if let Some(inv) = s.inverse() {
            return (s, inv);
        }
    }
}
