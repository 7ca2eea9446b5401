//! In-process transport for a whole table.
//!
//! [`LoopbackTransport`] owns every player's [`Session`], drains their
//! outbound envelopes into one queue and delivers them to the addressed
//! session, or to every other session for broadcasts. Delivery order is
//! global FIFO by default. LIFO reorders traffic across senders and is
//! available for exercising out-of-turn buffering.
//!
//! Faults are injected by muting a player (its outbound traffic is dropped)
//! or by pushing forged envelopes into the queue.

use std::collections::{BTreeSet, VecDeque};

use crate::{
    PlayerId,
    controller::{Controller, NoopController},
    message::{Envelope, Message},
    session::{Session, SessionEvent},
};

/// Order in which queued envelopes are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Fifo,
    Lifo,
}

pub struct LoopbackTransport<C = NoopController> {
    sessions: Vec<Session<C>>,
    queue: VecDeque<Envelope>,
    delivery: Delivery,
    muted: BTreeSet<PlayerId>,
    observed: Vec<Vec<SessionEvent>>,
}

impl<C: Controller> LoopbackTransport<C> {
    /// Wraps a table of sessions. `sessions[i]` must be player `i`.
    pub fn new(sessions: Vec<Session<C>>) -> Self {
        let observed = sessions.iter().map(|_| Vec::new()).collect();
        Self {
            sessions,
            queue: VecDeque::new(),
            delivery: Delivery::Fifo,
            muted: BTreeSet::new(),
            observed,
        }
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Panics if `player` is not seated.
    pub fn session(&self, player: PlayerId) -> &Session<C> {
        &self.sessions[player]
    }

    /// Panics if `player` is not seated.
    pub fn session_mut(&mut self, player: PlayerId) -> &mut Session<C> {
        &mut self.sessions[player]
    }

    pub fn sessions(&self) -> &[Session<C>] {
        &self.sessions
    }

    /// Non-outbound events a player has emitted so far.
    pub fn events(&self, player: PlayerId) -> &[SessionEvent] {
        self.observed.get(player).map(Vec::as_slice).unwrap_or_default()
    }

    /// Envelopes waiting for delivery.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn start_all(&mut self) {
        for session in &mut self.sessions {
            session.start();
        }
        self.collect();
    }

    /// Drops every envelope `player` sends from now on.
    pub fn mute(&mut self, player: PlayerId) {
        self.muted.insert(player);
    }

    pub fn unmute(&mut self, player: PlayerId) {
        self.muted.remove(&player);
    }

    /// Queues an envelope as if its `from` player had sent it.
    pub fn inject(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
    }

    /// Delivers one envelope. Returns `false` once nothing is in flight.
    pub fn step(&mut self) -> bool {
        self.collect();
        let next = match self.delivery {
            Delivery::Fifo => self.queue.pop_front(),
            Delivery::Lifo => self.queue.pop_back(),
        };
        let Some(Envelope { from, to, message }) = next else {
            return false;
        };

        match to {
            Some(target) => self.deliver(target, from, message),
            None => {
                for target in (0..self.sessions.len()).filter(|&p| p != from) {
                    self.deliver(target, from, message.clone());
                }
            },
        }
        self.collect();
        true
    }

    /// Delivers until the table is quiet. Returns the number of envelopes
    /// delivered.
    pub fn run(&mut self) -> usize {
        let mut delivered = 0;
        while self.step() {
            delivered += 1;
        }
        delivered
    }

    fn deliver(&mut self, target: PlayerId, from: PlayerId, message: Message) {
        let Some(session) = self.sessions.get_mut(target) else {
            tracing::warn!(to = target, from, "envelope for unknown player dropped");
            return;
        };
        if let Err(err) = session.receive(message, from) {
            tracing::debug!(to = target, from, %err, "delivery rejected");
        }
    }

    fn collect(&mut self) {
        for (player, session) in self.sessions.iter_mut().enumerate() {
            for event in session.drain_events() {
                match event {
                    SessionEvent::Outbound(envelope) => {
                        if self.muted.contains(&envelope.from) {
                            tracing::trace!(player, "muted envelope dropped");
                        } else {
                            self.queue.push_back(envelope);
                        }
                    },
                    other => self.observed[player].push(other),
                }
            }
        }
    }
}
