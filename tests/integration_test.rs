use std::{cell::RefCell, rc::Rc};

use dealerless::{
    Card, Controller, PlayerId, ProtocolError, SequenceError, Session, SessionConfig,
    SessionError, SessionEvent, SessionState, SlotIndex, SlotStatus, transport::LoopbackTransport,
};
use futures::executor::block_on;
use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};

const POKER_CTX: &[u8] = b"poker_integration_test";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Hook {
    Draw(PlayerId, SlotIndex, usize),
    Open(PlayerId, SlotIndex, usize),
}

/// Appends every completion hook to a shared log.
#[derive(Debug, Clone, Default)]
struct Recorder {
    log: Rc<RefCell<Vec<Hook>>>,
}

impl Controller for Recorder {
    fn draw(&mut self, peer: PlayerId, slot: SlotIndex, value: usize) {
        self.log.borrow_mut().push(Hook::Draw(peer, slot, value));
    }

    fn open(&mut self, peer: PlayerId, slot: SlotIndex, value: usize) {
        self.log.borrow_mut().push(Hook::Open(peer, slot, value));
    }
}

fn new_table<R: rand::RngCore>(
    rng: &mut R,
    players: usize,
    cards: usize,
) -> (LoopbackTransport<Recorder>, Vec<Rc<RefCell<Vec<Hook>>>>) {
    let recorders: Vec<Recorder> = (0..players).map(|_| Recorder::default()).collect();
    let logs = recorders.iter().map(|r| Rc::clone(&r.log)).collect();
    let sessions = recorders
        .into_iter()
        .enumerate()
        .map(|(index, recorder)| {
            let config = SessionConfig::new(cards, players, index).with_context(POKER_CTX);
            Session::new(config, recorder, rng).expect("valid config")
        })
        .collect();
    (LoopbackTransport::new(sessions), logs)
}

fn shuffled_table(players: usize, cards: usize) -> LoopbackTransport<Recorder> {
    let (mut table, _) = new_table(&mut rand::thread_rng(), players, cards);
    table.start_all();
    table.run();
    table
}

fn take(request: &mut dealerless::CardRequest) -> Result<Card, SessionError> {
    request.try_take().expect("request should have resolved")
}

/// Player `slot mod n` draws `slot`, all at once. Returns the cards by slot.
fn deal_round_robin<C: Controller>(table: &mut LoopbackTransport<C>, cards: usize) -> Vec<Card> {
    let n = table.player_count();
    let mut requests: Vec<_> = (0..cards)
        .map(|slot| table.session_mut(slot % n).draw(slot))
        .collect();
    table.run();
    requests
        .iter_mut()
        .map(|r| take(r).expect("draw should succeed"))
        .collect()
}

#[test]
fn test_full_poker_workflow() {
    let (mut table, logs) = new_table(&mut rand::thread_rng(), 4, 52);
    table.start_all();
    table.run();

    for player in 0..4 {
        assert!(table.session(player).is_ready());
        let ready = table
            .events(player)
            .iter()
            .filter(|e| **e == SessionEvent::Ready)
            .count();
        assert_eq!(ready, 1, "player {player} should see Ready exactly once");
    }

    let drawn = deal_round_robin(&mut table, 52);
    let mut values: Vec<usize> = drawn.iter().map(|c| c.value).collect();
    values.sort_unstable();
    assert_eq!(values, (0..52).collect::<Vec<_>>(), "every card dealt once");
    assert_eq!(table.session(0).next_undrawn(), None);

    for card in &drawn {
        let holder = card.slot % 4;
        let opened = take(&mut table.session_mut(holder).open(card.slot)).expect("open");
        assert_eq!(opened, *card);
    }
    table.run();

    for player in 0..4 {
        let session = table.session(player);
        assert_eq!(session.state(), SessionState::Idle);
        for card in &drawn {
            assert_eq!(
                session.slot_status(card.slot),
                Some(SlotStatus::Opened {
                    holder: card.slot % 4,
                    value: card.value
                })
            );
        }

        let log = logs[player].borrow();
        let draws = log.iter().filter(|h| matches!(h, Hook::Draw(..))).count();
        assert_eq!(draws, 13, "player {player} drew 13 cards");
        let mut opens: Vec<_> = log
            .iter()
            .filter_map(|h| match h {
                Hook::Open(peer, slot, value) => Some((*slot, *peer, *value)),
                Hook::Draw(..) => None,
            })
            .collect();
        opens.sort_unstable();
        let expected: Vec<_> = drawn.iter().map(|c| (c.slot, c.slot % 4, c.value)).collect();
        assert_eq!(opens, expected, "player {player} saw every open");
    }
}

#[test]
fn test_replicas_agree_on_locked_deck() {
    let table = shuffled_table(3, 20);
    let fingerprints: Vec<_> = table
        .sessions()
        .iter()
        .map(|s| s.deck_fingerprint().expect("deck is locked"))
        .collect();
    assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));

    let other = shuffled_table(3, 20);
    assert_ne!(
        other.session(0).deck_fingerprint(),
        table.session(0).deck_fingerprint(),
        "independent shuffles should differ"
    );
}

#[test]
fn test_double_draw_is_a_sequence_error() {
    let mut table = shuffled_table(3, 10);

    let mut first = table.session_mut(0).draw(4);
    let err = take(&mut table.session_mut(0).draw(4)).unwrap_err();
    assert_eq!(
        err,
        SessionError::from(SequenceError::AlreadyDrawn { slot: 4, holder: 0 })
    );
    table.run();
    let card = take(&mut first).expect("first draw succeeds");

    let err = take(&mut table.session_mut(0).draw(4)).unwrap_err();
    assert_eq!(
        err,
        SessionError::from(SequenceError::AlreadyDrawn { slot: 4, holder: 0 })
    );
    let err = take(&mut table.session_mut(2).draw(4)).unwrap_err();
    assert_eq!(
        err,
        SessionError::from(SequenceError::AlreadyDrawn { slot: 4, holder: 0 })
    );

    take(&mut table.session_mut(0).open(4)).expect("open");
    table.run();
    let err = take(&mut table.session_mut(1).draw(4)).unwrap_err();
    assert_eq!(err, SessionError::from(SequenceError::AlreadyOpened { slot: 4 }));
    assert_eq!(
        table.session(1).slot_status(4),
        Some(SlotStatus::Opened {
            holder: 0,
            value: card.value
        })
    );
}

#[test]
fn test_concurrent_claims_resolve_to_lowest_id() {
    let mut table = shuffled_table(3, 6);

    let mut high = table.session_mut(2).draw(0);
    let mut low = table.session_mut(1).draw(0);
    table.run();

    let card = take(&mut low).expect("lower id keeps the slot");
    assert_eq!(
        take(&mut high).unwrap_err(),
        SessionError::from(SequenceError::AlreadyDrawn { slot: 0, holder: 1 })
    );
    for player in 0..3 {
        let session = table.session(player);
        assert_eq!(session.slot_status(0), Some(SlotStatus::Drawn { holder: 1 }));
        assert_eq!(session.state(), SessionState::Idle);
    }

    take(&mut table.session_mut(1).open(0)).expect("open");
    table.run();
    for player in 0..3 {
        assert_eq!(
            table.session(player).slot_status(0),
            Some(SlotStatus::Opened {
                holder: 1,
                value: card.value
            })
        );
    }
}

#[test]
fn test_three_way_claim_is_dealt_once() {
    let mut table = shuffled_table(4, 8);

    let mut requests: Vec<_> = [3, 2, 1]
        .into_iter()
        .map(|player| (player, table.session_mut(player).draw(5)))
        .collect();
    table.run();

    for (player, request) in &mut requests {
        let result = take(request);
        if *player == 1 {
            assert!(result.is_ok(), "player 1 should win the slot");
        } else {
            assert!(matches!(
                result,
                Err(SessionError::Sequence(SequenceError::AlreadyDrawn { slot: 5, .. }))
            ));
        }
    }
    for player in 0..4 {
        assert_eq!(
            table.session(player).slot_status(5),
            Some(SlotStatus::Drawn { holder: 1 })
        );
    }
}

#[test]
fn test_request_result_is_taken_once() {
    let mut table = shuffled_table(2, 6);
    let mut request = table.session_mut(0).draw(1);
    assert!(request.try_take().is_none());

    table.run();
    assert!(request.try_take().expect("resolved").is_ok());
    assert!(request.try_take().is_none());
}

#[test]
fn test_open_sequence_errors() {
    let mut table = shuffled_table(2, 8);

    let err = take(&mut table.session_mut(1).open(3)).unwrap_err();
    assert_eq!(err, SessionError::from(SequenceError::NotDrawn { slot: 3 }));

    let mut request = table.session_mut(1).draw(3);
    table.run();
    take(&mut request).expect("draw");

    let err = take(&mut table.session_mut(0).open(3)).unwrap_err();
    assert_eq!(
        err,
        SessionError::from(SequenceError::NotHolder { slot: 3, holder: 1 })
    );

    take(&mut table.session_mut(1).open(3)).expect("first open");
    let err = take(&mut table.session_mut(1).open(3)).unwrap_err();
    assert_eq!(err, SessionError::from(SequenceError::AlreadyOpened { slot: 3 }));
}

#[test]
fn test_replayed_announce_is_idempotent() {
    let mut table = shuffled_table(3, 8);

    let mut request = table.session_mut(2).draw(0);
    table.run();
    let card = take(&mut request).expect("draw");

    take(&mut table.session_mut(2).open(0)).expect("open");
    let announce = table
        .session_mut(2)
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            SessionEvent::Outbound(envelope) => Some(envelope),
            _ => None,
        })
        .expect("open broadcasts an announcement");

    table.inject(announce.clone());
    table.run();
    let opened = Some(SlotStatus::Opened {
        holder: 2,
        value: card.value,
    });
    assert_eq!(table.session(0).slot_status(0), opened);

    table.inject(announce);
    table.run();
    assert_eq!(table.session(0).slot_status(0), opened);
    assert_eq!(table.session(1).slot_status(0), opened);
}

#[test]
fn test_concurrent_draws_of_distinct_slots() {
    let mut table = shuffled_table(3, 12);

    let mut requests: Vec<_> = (0..3)
        .flat_map(|player| [player, player + 3])
        .map(|slot| table.session_mut(slot % 3).draw(slot))
        .collect();
    for player in 0..3 {
        assert_eq!(table.session(player).state(), SessionState::Busy);
        assert_eq!(table.session(player).pending_requests(), 2);
    }
    table.run();

    let mut values: Vec<_> = requests
        .iter_mut()
        .map(|r| take(r).expect("draw").value)
        .collect();
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 6, "distinct slots hold distinct cards");

    for player in 0..3 {
        assert_eq!(table.session(player).state(), SessionState::Idle);
        assert_eq!(table.session(player).next_undrawn(), Some(6));
    }
}

#[test]
fn test_request_future_resolves() {
    let mut table = shuffled_table(2, 6);
    let request = table.session_mut(0).draw(5);
    assert_eq!(request.slot(), 5);
    table.run();

    let card = block_on(request).expect("draw");
    assert_eq!(card.slot, 5);
    assert!(card.value < 6);
}

#[test]
fn test_dropped_session_cancels_request() {
    let mut table = shuffled_table(2, 6);
    let request = table.session_mut(1).draw(0);
    drop(table);
    assert_eq!(block_on(request), Err(SessionError::Cancelled));
}

#[test]
fn test_silent_peer_stalls_draw() {
    let mut table = shuffled_table(3, 6);
    table.mute(1);

    let mut request = table.session_mut(0).draw(2);
    table.run();
    assert!(request.try_take().is_none(), "player 1 never shared");
    assert_eq!(table.session(0).state(), SessionState::Busy);
    assert_eq!(
        table.session(0).slot_status(2),
        Some(SlotStatus::Drawing { holder: 0 })
    );
    assert_eq!(
        table
            .session(0)
            .deck()
            .get(2)
            .map(|s| s.layers().iter().copied().collect::<Vec<_>>()),
        Some(vec![0, 1])
    );

    // Other slots keep working for players that still talk.
    table.unmute(1);
    let mut other = table.session_mut(2).draw(3);
    table.run();
    assert!(take(&mut other).is_ok());
    assert!(request.try_take().is_none());
}

#[test]
fn test_draw_before_shuffle() {
    let (mut table, _) = new_table(&mut rand::thread_rng(), 2, 6);
    let err = take(&mut table.session_mut(0).draw(0)).unwrap_err();
    assert_eq!(
        err,
        SessionError::from(ProtocolError::NotReady {
            state: SessionState::Init
        })
    );
}

#[test]
fn test_error_type_display() {
    let err = SessionError::from(ProtocolError::SlotOutOfRange {
        slot: 60,
        card_count: 52,
    });
    assert_eq!(
        err.to_string(),
        "protocol error: slot 60 out of range for deck of 52"
    );
    assert_eq!(
        SessionError::Cancelled.to_string(),
        "session dropped before the request resolved"
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_any_table_deals_a_permutation(players in 2usize..=4, cards in 2usize..=8, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut table, _) = new_table(&mut rng, players, cards);
        table.start_all();
        table.run();

        let drawn = deal_round_robin(&mut table, cards);
        let mut values: Vec<usize> = drawn.iter().map(|c| c.value).collect();
        values.sort_unstable();
        prop_assert_eq!(values, (0..cards).collect::<Vec<_>>());
    }
}
