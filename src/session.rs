//! Session state machine for one player.
//!
//! # Architecture: Event-Queue State Machine
//!
//! A session performs no I/O. Inbound messages go through
//! [`Session::receive`], one at a time, each processed to completion. Every
//! effect (outbound envelope, state change, readiness, rejected contribution)
//! is queued as a [`SessionEvent`] for the embedder to drain.
//!
//! ```text
//! ┌──────┐ start() ┌───────────┐ last lock ┌──────┐ draw() ┌──────┐
//! │ Init │────────>│ Shuffling │──────────>│ Idle │<──────>│ Busy │
//! └──────┘         └───────────┘           └──────┘ done   └──────┘
//!                        │ ShuffleError
//!                        ↓
//!                   ┌─────────┐
//!                   │ Aborted │
//!                   └─────────┘
//! ```
//!
//! `Busy` means at least one draw is waiting for shares. Requests for distinct
//! slots interleave freely; there is at most one per slot.

use std::{
    collections::{BTreeMap, VecDeque},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use ark_std::rand::{RngCore as Rng, SeedableRng, rngs::StdRng};
use futures::channel::oneshot;
use zeroize::Zeroize;

use crate::{
    PlayerId, SlotIndex,
    card::{Card, CardTable},
    config::SessionConfig,
    controller::{Controller, NoopController},
    deck::{Deck, SlotStatus},
    error::{ConfigError, ProtocolError, SessionError, ShuffleError},
    keys::KeyMaterial,
    message::{Envelope, Message},
    shuffle::{Pass, ShuffleCoordinator, Step, Turn, lock_deck, shuffle_deck},
};

/// Session-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, nothing exchanged yet
    Init,
    /// Shuffle coordinator running
    Shuffling,
    /// Locked deck ready, no outstanding draws
    Idle,
    /// At least one draw outstanding
    Busy,
    /// The shuffle failed; the session must be discarded
    Aborted,
}

/// Everything a session wants its embedder to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Deliver this envelope
    Outbound(Envelope),

    /// The locked deck is ready. Fired exactly once.
    Ready,

    /// A share or announcement was discarded; the request keeps waiting
    Rejected {
        peer: PlayerId,
        slot: SlotIndex,
        error: SessionError,
    },

    /// Fatal shuffle failure
    Failed(SessionError),
}

/// Result of a [`Session::draw`] or [`Session::open`].
///
/// Resolves once the exchange for its slot completes; failures detected at
/// call time resolve it immediately. Dropping the session first yields
/// [`SessionError::Cancelled`]. The result can be taken once.
#[derive(Debug)]
#[must_use = "a card request does nothing unless polled"]
pub struct CardRequest {
    slot: SlotIndex,
    rx: oneshot::Receiver<Result<Card, SessionError>>,
    taken: bool,
}

impl CardRequest {
    pub(crate) fn new(slot: SlotIndex, rx: oneshot::Receiver<Result<Card, SessionError>>) -> Self {
        Self {
            slot,
            rx,
            taken: false,
        }
    }

    pub(crate) fn resolved(slot: SlotIndex, result: Result<Card, SessionError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(slot, rx)
    }

    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Takes the result without blocking. `None` while the request is still
    /// pending, and again once the result has been taken.
    pub fn try_take(&mut self) -> Option<Result<Card, SessionError>> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result?,
            Err(oneshot::Canceled) => Err(SessionError::Cancelled),
        };
        self.taken = true;
        Some(result)
    }
}

impl Future for CardRequest {
    type Output = Result<Card, SessionError>;

    /// Polling again after completion yields [`SessionError::Cancelled`].
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Ready(Err(SessionError::Cancelled));
        }
        let poll = Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(SessionError::Cancelled)));
        if poll.is_ready() {
            self.taken = true;
        }
        poll
    }
}

/// An in-flight draw, keyed by slot.
pub(crate) struct PendingRequest {
    pub(crate) reply: oneshot::Sender<Result<Card, SessionError>>,
}

/// Protocol engine for one player.
///
/// Owns the key material, the shuffle coordinator, the deck model and every
/// pending request. See the [module docs](self) for the state machine.
pub struct Session<C = NoopController> {
    pub(crate) config: SessionConfig,
    pub(crate) controller: C,
    pub(crate) table: CardTable,
    pub(crate) keys: KeyMaterial,
    pub(crate) rng: StdRng,
    pub(crate) state: SessionState,
    pub(crate) coordinator: Option<ShuffleCoordinator>,
    pub(crate) deck: Deck,
    pub(crate) pending: BTreeMap<SlotIndex, PendingRequest>,
    pub(crate) events: VecDeque<SessionEvent>,
}

impl<C: Controller> Session<C> {
    /// Creates a session in [`SessionState::Init`].
    ///
    /// Key material is drawn from a private generator seeded by `rng`.
    pub fn new<R: Rng>(config: SessionConfig, controller: C, rng: &mut R) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = CardTable::new(config.card_count, &config.context)?;

        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let mut rng = StdRng::from_seed(seed);
        seed.zeroize();

        let keys = KeyMaterial::generate(&mut rng);
        let coordinator = ShuffleCoordinator::new(config.player_count, table.points());

        Ok(Self {
            config,
            controller,
            table,
            keys,
            rng,
            state: SessionState::Init,
            coordinator: Some(coordinator),
            deck: Deck::default(),
            pending: BTreeMap::new(),
            events: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn index(&self) -> PlayerId {
        self.config.index
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the locked deck exists and the session has not aborted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Busy)
    }

    #[must_use]
    pub fn card_table(&self) -> &CardTable {
        &self.table
    }

    /// The deck model. Empty until the shuffle completes.
    #[must_use]
    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    #[must_use]
    pub fn slot_status(&self, slot: SlotIndex) -> Option<SlotStatus> {
        self.deck.get(slot).map(|s| s.status())
    }

    /// Lowest slot nobody has claimed yet.
    #[must_use]
    pub fn next_undrawn(&self) -> Option<SlotIndex> {
        self.deck
            .iter()
            .position(|s| s.status() == SlotStatus::Undrawn)
    }

    /// Digest of the locked deck, `None` before the shuffle completes.
    #[must_use]
    pub fn deck_fingerprint(&self) -> Option<[u8; 32]> {
        (!self.deck.is_empty()).then(|| self.deck.fingerprint())
    }

    /// Number of draws waiting for shares.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Next queued event, oldest first.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Begins the shuffle. No-op unless in [`SessionState::Init`].
    pub fn start(&mut self) {
        if self.state != SessionState::Init {
            tracing::debug!(player = self.index(), state = ?self.state, "start ignored");
            return;
        }
        self.set_state(SessionState::Shuffling);
        if let Err(err) = self.advance_shuffle() {
            tracing::debug!(player = self.index(), %err, "shuffle stopped at start");
        }
    }

    /// Single inbound entrypoint.
    ///
    /// Errors are informational: the offending message has been dropped and
    /// the session remains consistent. Cryptographic failures are also queued
    /// as [`SessionEvent::Rejected`].
    pub fn receive(&mut self, message: Message, sender: PlayerId) -> Result<(), SessionError> {
        let kind = message.kind();
        let result = self.dispatch(message, sender);
        if let Err(err) = &result {
            tracing::warn!(player = self.index(), sender, kind, %err, "dropped inbound message");
        }
        result
    }

    fn dispatch(&mut self, message: Message, sender: PlayerId) -> Result<(), SessionError> {
        if sender >= self.config.player_count || sender == self.index() {
            return Err(ProtocolError::UnknownSender { sender }.into());
        }

        match message {
            Message::Shuffle { deck } => self.on_step(sender, Step::Shuffle(deck)),
            Message::Lock { deck, commitments } => {
                self.on_step(sender, Step::Lock(deck, commitments))
            },
            Message::DrawRequest { slot } => self.on_draw_request(sender, slot),
            Message::DrawShare { slot, key } => self.on_draw_share(sender, slot, key),
            Message::OpenAnnounce { slot, key } => self.on_open_announce(sender, slot, key),
        }
    }

    fn on_step(&mut self, sender: PlayerId, step: Step) -> Result<(), SessionError> {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return Err(ProtocolError::UnexpectedStep {
                pass: match step {
                    Step::Shuffle(_) => Pass::Shuffle.name(),
                    Step::Lock(..) => Pass::Lock.name(),
                },
                sender,
            }
            .into());
        };
        coordinator.buffer(sender, step)?;

        if self.state == SessionState::Shuffling {
            self.advance_shuffle()?;
        }
        Ok(())
    }

    /// Applies buffered steps and contributes our own until we are waiting on
    /// a peer or the deck is locked.
    fn advance_shuffle(&mut self) -> Result<(), SessionError> {
        let me = self.index();
        loop {
            let Some(coordinator) = self.coordinator.as_mut() else {
                return Ok(());
            };

            let (sender, step) = match coordinator.turn() {
                Turn::Locked => {
                    self.finish_shuffle();
                    return Ok(());
                },
                Turn::Player(Pass::Shuffle, player) if player == me => {
                    let deck = shuffle_deck(&mut self.rng, self.keys.shuffle_key(), coordinator.deck());
                    (me, Step::Shuffle(deck))
                },
                Turn::Player(Pass::Lock, player) if player == me => {
                    let commitments = self.keys.generate_locks(&mut self.rng, self.config.card_count);
                    let deck = lock_deck(
                        self.keys.shuffle_key_inverse(),
                        self.keys.locks(),
                        coordinator.deck(),
                    );
                    (me, Step::Lock(deck, commitments))
                },
                Turn::Player(..) => match coordinator.take_buffered() {
                    Some(buffered) => buffered,
                    None => return Ok(()),
                },
            };

            let outbound = (sender == me).then(|| step.clone().into_message());
            if let Err(err) = coordinator.accept(sender, step) {
                self.abort(err.clone());
                return Err(err.into());
            }
            tracing::debug!(player = me, sender, "shuffle step accepted");

            if let Some(message) = outbound {
                self.broadcast(message);
            }
        }
    }

    fn finish_shuffle(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        let (points, commitments) = coordinator.finish();
        self.deck = Deck::locked(points, &commitments);

        tracing::debug!(
            player = self.index(),
            slots = self.deck.len(),
            "deck locked"
        );
        self.set_state(SessionState::Idle);
        self.events.push_back(SessionEvent::Ready);
    }

    fn abort(&mut self, err: ShuffleError) {
        tracing::error!(player = self.index(), %err, "shuffle failed, aborting session");
        self.coordinator = None;
        self.set_state(SessionState::Aborted);
        self.events.push_back(SessionEvent::Failed(err.into()));
    }

    pub(crate) fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::debug!(player = self.index(), ?from, ?to, "state change");
        self.state = to;
        self.events.push_back(SessionEvent::StateChanged { from, to });
    }

    /// Moves between `Idle` and `Busy` to match the pending set.
    pub(crate) fn refresh_busy(&mut self) {
        if !self.is_ready() {
            return;
        }
        let to = if self.pending.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Busy
        };
        self.set_state(to);
    }

    pub(crate) fn broadcast(&mut self, message: Message) {
        tracing::trace!(player = self.index(), kind = message.kind(), "broadcast");
        self.events.push_back(SessionEvent::Outbound(Envelope {
            from: self.index(),
            to: None,
            message,
        }));
    }

    /// Queues a [`SessionEvent::Rejected`] and hands the error back.
    pub(crate) fn reject(&mut self, peer: PlayerId, slot: SlotIndex, error: SessionError) -> SessionError {
        self.events.push_back(SessionEvent::Rejected {
            peer,
            slot,
            error: error.clone(),
        });
        error
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), ProtocolError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ProtocolError::NotReady { state: self.state })
        }
    }

    pub(crate) fn out_of_range(&self, slot: SlotIndex) -> ProtocolError {
        ProtocolError::SlotOutOfRange {
            slot,
            card_count: self.config.card_count,
        }
    }

    /// Advances `slot` after one of its layers came off.
    pub(crate) fn settle(&mut self, slot: SlotIndex) -> Result<(), SessionError> {
        let me = self.index();
        let Some(entry) = self.deck.get_mut(slot) else {
            return Ok(());
        };

        if let SlotStatus::Drawing { holder } = entry.status() {
            if entry.layers().iter().any(|&p| p != holder) {
                return Ok(());
            }
            entry.set_status(SlotStatus::Drawn { holder });
            if holder == me {
                self.complete_draw(slot);
                return Ok(());
            }
            tracing::debug!(player = me, slot, holder, "slot drawn");
        }

        self.try_finish_open(slot)
    }
}
