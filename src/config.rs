use crate::{PlayerId, error::ConfigError};

/// Construction parameters for a [`Session`](crate::Session). Immutable once
/// the session exists.
///
/// The curve is fixed to secp256k1; `context` domain-separates the card table
/// so tables for different games never share points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deck size
    pub card_count: usize,
    /// Players at the table
    pub player_count: usize,
    /// Own seat, `[0, player_count)`
    pub index: PlayerId,
    /// Domain separation for the card table
    pub context: Vec<u8>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            card_count: 52,
            player_count: 2,
            index: 0,
            context: Self::DEFAULT_CONTEXT.to_vec(),
        }
    }
}

impl SessionConfig {
    /// Largest supported deck.
    pub const MAX_CARDS: usize = 1 << 12;

    const DEFAULT_CONTEXT: &'static [u8] = b"dealerless/v1";

    #[must_use]
    pub fn new(card_count: usize, player_count: usize, index: PlayerId) -> Self {
        Self {
            card_count,
            player_count,
            index,
            ..Self::default()
        }
    }

    /// Replaces the card table context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<Vec<u8>>) -> Self {
        self.context = context.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.card_count == 0 || self.card_count > Self::MAX_CARDS {
            return Err(ConfigError::CardCount {
                got: self.card_count,
                max: Self::MAX_CARDS,
            });
        }
        if self.player_count < 2 {
            return Err(ConfigError::PlayerCount(self.player_count));
        }
        if self.index >= self.player_count {
            return Err(ConfigError::PlayerIndex {
                index: self.index,
                player_count: self.player_count,
            });
        }
        Ok(())
    }
}
