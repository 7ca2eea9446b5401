use std::time::Instant;

use clap::Parser;
use dealerless::{
    Card, Controller, PlayerId, Session, SessionConfig, SessionError, SlotIndex,
    transport::LoopbackTransport,
};
use rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::EnvFilter;

/// Deal and open a full deck across a table of dealerless sessions.
#[derive(Debug, Parser)]
#[command(name = "poker_sim")]
struct Args {
    /// Players at the table
    #[arg(long, default_value_t = 4)]
    players: usize,

    /// Deck size
    #[arg(long, default_value_t = 52)]
    cards: usize,

    /// Seed for reproducible runs; fresh entropy otherwise
    #[arg(long)]
    seed: Option<u64>,
}

/// Counts hook invocations so the summary can report them.
#[derive(Debug, Default)]
struct Tally {
    draws: usize,
    opens: usize,
}

impl Controller for Tally {
    fn draw(&mut self, _peer: PlayerId, _slot: SlotIndex, _value: usize) {
        self.draws += 1;
    }

    fn open(&mut self, _peer: PlayerId, _slot: SlotIndex, _value: usize) {
        self.opens += 1;
    }
}

struct PokerTable {
    transport: LoopbackTransport<Tally>,
    cards: usize,
}

impl PokerTable {
    fn new(args: &Args) -> Result<Self, SessionError> {
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let ctx = b"texas_hold'em".to_vec();

        let sessions = (0..args.players)
            .map(|index| {
                let config =
                    SessionConfig::new(args.cards, args.players, index).with_context(ctx.clone());
                Session::new(config, Tally::default(), &mut rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            transport: LoopbackTransport::new(sessions),
            cards: args.cards,
        })
    }

    fn players(&self) -> usize {
        self.transport.player_count()
    }

    /// Player `slot mod n` draws `slot`, all requests outstanding at once.
    fn deal_all(&mut self) -> Result<Vec<Card>, SessionError> {
        let n = self.players();
        let mut requests: Vec<_> = (0..self.cards)
            .map(|slot| self.transport.session_mut(slot % n).draw(slot))
            .collect();
        self.transport.run();

        requests
            .iter_mut()
            .map(|r| r.try_take().unwrap_or(Err(SessionError::Cancelled)))
            .collect()
    }

    fn open_all(&mut self) -> Result<Vec<Card>, SessionError> {
        let n = self.players();
        let mut opened = Vec::with_capacity(self.cards);
        for slot in 0..self.cards {
            let mut request = self.transport.session_mut(slot % n).open(slot);
            opened.push(request.try_take().unwrap_or(Err(SessionError::Cancelled))?);
        }
        self.transport.run();
        Ok(opened)
    }
}

fn card_to_string(cards: usize, value: usize) -> String {
    if cards != 52 {
        return format!("#{value}");
    }

    let suits = ["♣", "♦", "♥", "♠"];
    let ranks = [
        "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K", "A",
    ];

    format!("{}{}", ranks[value % 13], suits[value / 13])
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    println!("=== Dealerless Table Simulation ===\n");
    println!("Players: {}", args.players);
    println!("Cards:   {}", args.cards);
    println!();

    let mut table = PokerTable::new(&args)?;

    println!("--- Shuffle Phase ---");
    let start_shuffle = Instant::now();
    table.transport.start_all();
    let shuffle_messages = table.transport.run();
    let shuffle_time = start_shuffle.elapsed();

    let fingerprints: Vec<_> = table
        .transport
        .sessions()
        .iter()
        .map(|s| s.deck_fingerprint())
        .collect();
    if fingerprints.iter().any(|f| f.is_none() || *f != fingerprints[0]) {
        return Err("replicas disagree on the locked deck".into());
    }
    println!(
        "✓ Deck shuffled and locked by every player ({} deliveries, {:.2}s)",
        shuffle_messages,
        shuffle_time.as_secs_f64()
    );
    println!();

    println!("--- Dealing Phase ---");
    let start_deal = Instant::now();
    let drawn = table.deal_all()?;
    let deal_time = start_deal.elapsed();
    for card in &drawn {
        println!(
            "  P{} privately drew slot {:>2}: {}",
            card.slot % table.players(),
            card.slot,
            card_to_string(table.cards, card.value)
        );
    }

    let mut values: Vec<_> = drawn.iter().map(|c| c.value).collect();
    values.sort_unstable();
    if values != (0..table.cards).collect::<Vec<_>>() {
        return Err("drawn cards are not a permutation of the deck".into());
    }
    println!("✓ Every card dealt exactly once ({:.2}s)", deal_time.as_secs_f64());
    println!();

    println!("--- Showdown ---");
    let start_open = Instant::now();
    let opened = table.open_all()?;
    let open_time = start_open.elapsed();
    if opened != drawn {
        return Err("opened cards differ from drawn cards".into());
    }
    println!("✓ Opened cards match private draws ({:.2}s)", open_time.as_secs_f64());
    println!();

    println!("=== Summary ===");
    for (player, session) in table.transport.sessions().iter().enumerate() {
        let tally = session.controller();
        println!(
            "  P{player}: {} draws completed, {} opens observed",
            tally.draws, tally.opens
        );
    }
    println!();
    println!("Timing:");
    println!("  Shuffle + lock:  {:.2}s", shuffle_time.as_secs_f64());
    println!("  Deal all cards:  {:.2}s", deal_time.as_secs_f64());
    println!("  Open all cards:  {:.2}s", open_time.as_secs_f64());
    Ok(())
}
