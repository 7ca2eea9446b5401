//! Shuffle coordinator: builds the locked deck in two sequential passes.
//!
//! Players act in ascending id order and broadcast every step, so all
//! replicas follow the same deck:
//!
//! 1. **Shuffle**: multiply every point by the player's shuffle scalar `s`,
//!    then permute privately.
//! 2. **Lock**: multiply slot `i` by `s⁻¹·kᵢ`, trading the shared shuffle
//!    layer for an independent per-slot lock, and publish `kᵢ·G`.
//!
//! After the last lock the deck carries exactly one layer per player on every
//! slot and its order is final. Steps are checked for shape only (size,
//! duplicates, identity points); there is no proof that a step is an honest
//! permutation. A dishonest step surfaces later as a slot that fails to
//! decode.

use std::collections::{BTreeMap, HashSet};

use ark_ec::CurveGroup;
use ark_std::rand::{RngCore as Rng, seq::SliceRandom};

use crate::{
    CurveAffine, CurveProj, PlayerId, Scalar,
    error::{ProtocolError, ShuffleError},
    keys::LockCommitment,
    message::Message,
};

/// Which pass a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Pass {
    Shuffle,
    Lock,
}

impl Pass {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Shuffle => "shuffle",
            Self::Lock => "lock",
        }
    }
}

/// One player's contribution to a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Shuffle(Vec<CurveAffine>),
    Lock(Vec<CurveAffine>, Vec<LockCommitment>),
}

impl Step {
    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Shuffle(deck) => Message::Shuffle { deck },
            Self::Lock(deck, commitments) => Message::Lock { deck, commitments },
        }
    }

    fn pass(&self) -> Pass {
        match self {
            Self::Shuffle(_) => Pass::Shuffle,
            Self::Lock(..) => Pass::Lock,
        }
    }
}

/// Whose turn it is, or that the deck is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    Player(Pass, PlayerId),
    Locked,
}

#[derive(Debug, Clone)]
pub(crate) struct ShuffleCoordinator {
    player_count: usize,
    card_count: usize,
    pass: Pass,
    next: PlayerId,
    deck: Vec<CurveAffine>,
    commitments: Vec<Vec<LockCommitment>>,
    backlog: BTreeMap<(Pass, PlayerId), Step>,
}

impl ShuffleCoordinator {
    /// Starts from the plaintext card points in value order.
    pub(crate) fn new(player_count: usize, open_deck: &[CurveAffine]) -> Self {
        Self {
            player_count,
            card_count: open_deck.len(),
            pass: Pass::Shuffle,
            next: 0,
            deck: open_deck.to_vec(),
            commitments: Vec::with_capacity(player_count),
            backlog: BTreeMap::new(),
        }
    }

    pub(crate) fn turn(&self) -> Turn {
        match (self.pass, self.next == self.player_count) {
            (Pass::Lock, true) => Turn::Locked,
            (pass, _) => Turn::Player(pass, self.next),
        }
    }

    /// Current deck, as left by the last accepted step.
    pub(crate) fn deck(&self) -> &[CurveAffine] {
        &self.deck
    }

    /// Queues a peer's step until its turn comes up.
    pub(crate) fn buffer(&mut self, sender: PlayerId, step: Step) -> Result<(), ProtocolError> {
        let pass = step.pass();
        let stale = match self.turn() {
            Turn::Locked => true,
            Turn::Player(current, next) => (pass, sender) < (current, next),
        };
        if stale || self.backlog.contains_key(&(pass, sender)) {
            return Err(ProtocolError::UnexpectedStep {
                pass: pass.name(),
                sender,
            });
        }
        self.backlog.insert((pass, sender), step);
        Ok(())
    }

    /// Takes the buffered step for the current turn, if it has arrived.
    pub(crate) fn take_buffered(&mut self) -> Option<(PlayerId, Step)> {
        match self.turn() {
            Turn::Player(pass, next) => self.backlog.remove(&(pass, next)).map(|s| (next, s)),
            Turn::Locked => None,
        }
    }

    /// Validates and applies the current player's step.
    pub(crate) fn accept(&mut self, sender: PlayerId, step: Step) -> Result<(), ShuffleError> {
        match step {
            Step::Shuffle(deck) => {
                self.check_deck(sender, &deck)?;
                self.deck = deck;
            },
            Step::Lock(deck, commitments) => {
                self.check_deck(sender, &deck)?;
                self.check_commitments(sender, &commitments)?;
                self.deck = deck;
                self.commitments.push(commitments);
            },
        }

        self.next += 1;
        if self.pass == Pass::Shuffle && self.next == self.player_count {
            self.pass = Pass::Lock;
            self.next = 0;
        }
        Ok(())
    }

    /// Consumes the coordinator once every lock step is in.
    pub(crate) fn finish(self) -> (Vec<CurveAffine>, Vec<Vec<LockCommitment>>) {
        (self.deck, self.commitments)
    }

    fn check_deck(&self, sender: PlayerId, deck: &[CurveAffine]) -> Result<(), ShuffleError> {
        if deck.len() != self.card_count {
            return Err(ShuffleError::WrongSize {
                sender,
                expected: self.card_count,
                actual: deck.len(),
            });
        }

        let mut seen = HashSet::with_capacity(deck.len());
        for (slot, point) in deck.iter().enumerate() {
            if *point == CurveAffine::identity() {
                return Err(ShuffleError::IdentityPoint { sender, slot });
            }
            if !seen.insert(*point) {
                return Err(ShuffleError::DuplicatePoint { sender, slot });
            }
        }
        Ok(())
    }

    fn check_commitments(
        &self,
        sender: PlayerId,
        commitments: &[LockCommitment],
    ) -> Result<(), ShuffleError> {
        if commitments.len() != self.card_count {
            return Err(ShuffleError::CommitmentCount {
                sender,
                expected: self.card_count,
                actual: commitments.len(),
            });
        }
        match commitments.iter().position(LockCommitment::is_identity) {
            Some(slot) => Err(ShuffleError::IdentityCommitment { sender, slot }),
            None => Ok(()),
        }
    }
}

/// Re-encrypts every point under `key`, then permutes the deck.
pub(crate) fn shuffle_deck<R: Rng>(rng: &mut R, key: Scalar, deck: &[CurveAffine]) -> Vec<CurveAffine> {
    let projs: Vec<CurveProj> = deck.iter().map(|p| *p * key).collect();
    let mut next = CurveProj::normalize_batch(&projs);
    next.as_mut_slice().shuffle(rng);
    next
}

/// Swaps the shuffle layer (`unshuffle = s⁻¹`) for one lock per slot.
pub(crate) fn lock_deck(unshuffle: Scalar, locks: &[Scalar], deck: &[CurveAffine]) -> Vec<CurveAffine> {
    let projs: Vec<CurveProj> = deck
        .iter()
        .zip(locks)
        .map(|(p, k)| *p * (unshuffle * k))
        .collect();
    CurveProj::normalize_batch(&projs)
}
