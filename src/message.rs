use crate::{CurveAffine, PlayerId, SlotIndex, keys::{LockCommitment, UnlockKey}};

/// Protocol payloads exchanged between sessions.
///
/// No wire encoding is implied; the embedder serializes however it likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Shuffle pass: the sender's permuted, re-encrypted deck
    Shuffle { deck: Vec<CurveAffine> },

    /// Lock pass: the sender swapped its shuffle layer for per-slot locks
    Lock {
        deck: Vec<CurveAffine>,
        commitments: Vec<LockCommitment>,
    },

    /// The sender wants to privately learn `slot`
    DrawRequest { slot: SlotIndex },

    /// The sender's unlock key for a slot someone else is drawing
    DrawShare { slot: SlotIndex, key: UnlockKey },

    /// The holder's own unlock key, making `slot` public
    OpenAnnounce { slot: SlotIndex, key: UnlockKey },
}

impl Message {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shuffle { .. } => "shuffle",
            Self::Lock { .. } => "lock",
            Self::DrawRequest { .. } => "draw_request",
            Self::DrawShare { .. } => "draw_share",
            Self::OpenAnnounce { .. } => "open_announce",
        }
    }
}

/// A message with its routing: `to == None` means broadcast to every other
/// player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: PlayerId,
    pub to: Option<PlayerId>,
    pub message: Message,
}
