#![forbid(clippy::all)]

//! Dealerless mental poker over secp256k1.
//!
//! N mutually distrusting players collectively shuffle a deck, privately draw
//! slots and later open them publicly, without a trusted dealer. Every card is
//! a curve point; every player contributes one commutative multiplicative
//! layer per slot, so a slot's identity is only recoverable once all layers
//! are peeled off.
//!
//! The protocol engine is [`Session`]: a sans-IO state machine that consumes
//! inbound [`Message`]s through [`Session::receive`] and queues
//! [`SessionEvent`]s (outbound envelopes, state changes, readiness) for the
//! embedder to drain. Draws and opens return a [`CardRequest`] future that
//! resolves once the message exchange for that slot completes.
//!
//! # Examples
//!
//! ```
//! use dealerless::{Session, SessionConfig, NoopController, transport::LoopbackTransport};
//! # let mut rng = ark_std::test_rng();
//!
//! let sessions = (0..3)
//!     .map(|index| {
//!         let config = SessionConfig::new(10, 3, index);
//!         Session::new(config, NoopController, &mut rng).unwrap()
//!     })
//!     .collect();
//!
//! let mut table = LoopbackTransport::new(sessions);
//! table.start_all();
//! table.run();
//!
//! let mut request = table.session_mut(1).draw(4);
//! table.run();
//! let card = request.try_take().unwrap().unwrap();
//! assert!(card.value < 10);
//! ```

mod card;
mod config;
mod controller;
mod deck;
mod draw;
mod error;
mod keys;
mod message;
mod open;
mod session;
mod shuffle;
pub mod transport;

use ark_ec::{AffineRepr, CurveConfig, short_weierstrass::SWCurveConfig};

pub use card::{Card, CardTable};
pub use config::SessionConfig;
pub use controller::{Controller, NoopController, Verdict};
pub use deck::{Deck, EncryptedSlot, SlotStatus};
pub use error::{
    ConfigError, ProtocolError, SequenceError, SessionError, ShuffleError, VerificationError,
};
pub use keys::{LockCommitment, UnlockKey, Verified};
pub use message::{Envelope, Message};
pub use session::{CardRequest, Session, SessionEvent, SessionState};

type Curve = ark_secp256k1::Config;
type CurveAffine = ark_secp256k1::Affine;
type CurveProj = <CurveAffine as AffineRepr>::Group;
type Scalar = <Curve as CurveConfig>::ScalarField;

const GENERATOR: CurveAffine = <Curve as SWCurveConfig>::GENERATOR;

/// A point on the deck's curve (secp256k1, affine form).
pub type Point = CurveAffine;

/// Zero-based player identifier, `[0, player_count)`.
pub type PlayerId = usize;

/// Zero-based physical deck position, `[0, card_count)`.
pub type SlotIndex = usize;
