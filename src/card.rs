use std::collections::HashMap;

use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_std::rand::{SeedableRng, rngs::StdRng};
use sha2::{Digest, Sha256};

use crate::{CurveAffine, CurveProj, SlotIndex, error::ConfigError};

// Deterministic PRNG seed
const CARD_TABLE_PRNG_SEED: &[u8] = b"DEALERLESS-CARD-TABLE-V1";

/// A card whose identity has been recovered.
///
/// `slot` is the physical deck position it was dealt from; `value` is the
/// logical identity in `[0, card_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Card {
    pub slot: SlotIndex,
    pub value: usize,
}

/// Public bijection between card values and curve points.
///
/// Points are drawn from a PRNG seeded with a SHA-256 hash of the context, so
/// every player derives the same table and nobody knows the discrete log of
/// any card point.
///
/// # Examples
///
/// ```
/// use dealerless::CardTable;
///
/// let table = CardTable::new(52, b"my_poker_game").unwrap();
/// let point = table.encode(17).unwrap();
/// assert_eq!(table.decode(&point), Some(17));
///
/// // Out of range values have no point
/// assert!(table.encode(52).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CardTable {
    points: Vec<CurveAffine>,
    index: HashMap<CurveAffine, usize>,
}

impl CardTable {
    /// Derives the table for `card_count` cards under `ctx`.
    ///
    /// Fails with [`ConfigError::DegenerateCardTable`] if the derivation ever
    /// yields the identity or a repeated point.
    pub fn new(card_count: usize, ctx: &[u8]) -> Result<Self, ConfigError> {
        let mut h = Sha256::new();
        h.update(CARD_TABLE_PRNG_SEED);
        h.update(ctx.len().to_be_bytes());
        h.update(ctx);
        let mut drng = StdRng::from_seed(h.finalize().into());

        let projs: Vec<CurveProj> = (0..card_count).map(|_| CurveProj::rand(&mut drng)).collect();
        let points = CurveProj::normalize_batch(&projs);

        let mut index = HashMap::with_capacity(card_count);
        for (value, point) in points.iter().enumerate() {
            if *point == CurveAffine::identity() || index.insert(*point, value).is_some() {
                return Err(ConfigError::DegenerateCardTable { value });
            }
        }

        Ok(Self { points, index })
    }

    /// Point for card `value`, or `None` if out of range.
    #[must_use]
    pub fn encode(&self, value: usize) -> Option<CurveAffine> {
        self.points.get(value).copied()
    }

    /// Card value for `point`, or `None` if it is not a card of this table.
    #[must_use]
    pub fn decode(&self, point: &CurveAffine) -> Option<usize> {
        self.index.get(point).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub(crate) fn points(&self) -> &[CurveAffine] {
        &self.points
    }
}
