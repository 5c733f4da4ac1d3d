//! Verirand demo
//!
//! Walks through a two-party card shuffle, a coordinated three-party round
//! with event entropy, and a run of dice rolls from precommitted batches.
//! Every result is re-verified from the in-memory ledger at the end.

use std::sync::Arc;
use anyhow::{bail, Context};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verirand::{
    VERSION,
    apps::{cards::ShuffledDeck, dice::{DiceRoller, DieRoll}},
    config::ProtocolConfig,
    core::{ids::{PartyId, RoundId}, secret::{OsSecretGenerator, SecretGenerator}},
    exchange::{DirectExchange, PublishedExchange, SeedExchange},
    ledger::{
        capability::{issue_token, validate_token, CapabilityScope},
        entropy::{EntropySource, EventDigestSource, ObservedEvent},
        records::{BatchRootRecord, EntryKind, LeafDisclosure, Subject},
        sink::{InMemoryLedger, PersistenceSink},
        transport::ChannelTransport,
    },
    proof::verify::{verify_round, RoundAudit},
    round::{BatchLedger, LedgerKey, RevealCoordinator, RoundPolicy},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ProtocolConfig::from_env().context("loading configuration")?;
    info!("Verirand v{}", VERSION);
    info!("Batch size {}, round timeout {:?}", config.batch_size, config.round_timeout);

    let sink = Arc::new(InMemoryLedger::new());

    demo_card_shuffle(&config).await?;
    demo_coordinated_round(&config, sink.clone()).await?;
    demo_dice(&config, sink.clone()).await?;

    info!("Ledger holds {} entries", sink.len());
    Ok(())
}

/// Alice and Bob shuffle a deck over a direct link.
async fn demo_card_shuffle(config: &ProtocolConfig) -> anyhow::Result<()> {
    info!("=== Card shuffle (direct) ===");

    let alice = PartyId::random();
    let bob = PartyId::random();
    let (ta, tb) = ChannelTransport::pair(alice, bob, 8);
    let mut alice_side = DirectExchange::new(alice, ta, config);
    let mut bob_side = DirectExchange::new(bob, tb, config);

    let mut gen = OsSecretGenerator::os();
    let (alice_secret, bob_secret) = (gen.generate_one()?, gen.generate_one()?);
    let round_id = RoundId::random();
    let (a, b) = tokio::join!(
        ShuffledDeck::shuffle(&mut alice_side, round_id, alice_secret),
        ShuffledDeck::shuffle(&mut bob_side, round_id, bob_secret),
    );
    let (mut a, b) = (a?, b?);

    if a.cards != b.cards {
        bail!("players disagree on the shuffle");
    }
    if !a.verify()? {
        bail!("shuffle does not replay from the audit");
    }

    let hand: Vec<String> = a.deal(5).iter().map(|c| c.to_string()).collect();
    info!("Seed {} -> first hand {}", a.seed, hand.join(" "));
    Ok(())
}

/// Three parties through a coordinator, two reveals needed, with event entropy.
async fn demo_coordinated_round(config: &ProtocolConfig, sink: Arc<InMemoryLedger>) -> anyhow::Result<()> {
    info!("=== Coordinated round (2 of 3) ===");

    let coordinator = Arc::new(RevealCoordinator::new(config.clone()).with_sink(sink.clone()));
    let parties: Vec<PartyId> = (0..3).map(|_| PartyId::random()).collect();
    let round_id = coordinator
        .open_round(parties.iter().copied(), RoundPolicy::Threshold { k: 2 })
        .await?;

    let events: Vec<ObservedEvent> = (0..4u8)
        .map(|i| ObservedEvent {
            observed_at: Utc::now(),
            origin: parties[usize::from(i) % parties.len()],
            payload: vec![i; 8],
        })
        .collect();
    let entropy = EventDigestSource::default()
        .observe(futures_util::stream::iter(events))
        .await?;
    coordinator.add_external_entropy(round_id, entropy).await?;

    let mut handles = Vec::new();
    for party in &parties {
        let mut side = PublishedExchange::new(*party, coordinator.clone());
        let secret = OsSecretGenerator::os().generate_one()?;
        handles.push(tokio::spawn(async move { side.exchange(round_id, secret).await }));
    }
    let mut seeds = Vec::new();
    for handle in handles {
        seeds.push(handle.await??.seed);
    }

    let audit = RoundAudit::fetch(sink.as_ref(), round_id)?;
    let recomputed = verify_round(round_id, &audit)?;
    if seeds.iter().any(|s| *s != recomputed) {
        bail!("offline verification disagrees with participants");
    }
    info!("Round {:?} seed {} verified from {} reveals", round_id, recomputed, audit.reveals.len());
    Ok(())
}

/// Ten d20 rolls from 4-leaf batches, checked from ledger records only.
async fn demo_dice(config: &ProtocolConfig, sink: Arc<InMemoryLedger>) -> anyhow::Result<()> {
    info!("=== Dice (progressive disclosure) ===");

    let roller_id = PartyId::random();
    let opponent = PartyId::random();
    let key = LedgerKey::pair(roller_id, opponent);
    let batch_config = ProtocolConfig { batch_size: 4, prefetch_threshold: 1, ..config.clone() };
    let ledger = Arc::new(BatchLedger::new(batch_config, OsSecretGenerator::os())?.with_sink(sink.clone()));
    let roller = DiceRoller::new(ledger.clone(), key);

    let mut values = Vec::new();
    for _ in 0..10 {
        let roll = roller.roll(20).await?;
        roller.disclose(&roll)?;
        values.push(roll.value);

        // Opponent side: root and disclosure come from the ledger
        let entries = sink.entries_for(&Subject::Batch(roll.leaf.batch_id))?;
        let root = entries
            .iter()
            .find(|e| e.kind == EntryKind::BatchRoot)
            .context("batch root missing")?
            .decode::<BatchRootRecord>()?
            .root;
        let disclosure = entries
            .iter()
            .filter(|e| e.kind == EntryKind::LeafDisclosure)
            .map(|e| e.decode::<LeafDisclosure>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .find(|d| d.index == roll.leaf.index)
            .context("leaf disclosure missing")?;
        if !DieRoll::verify(&root, 20, roll.value, &disclosure) {
            bail!("roll {} failed verification", roll.value);
        }
    }
    info!("Rolled {:?}, all verified; {} batches used", values, ledger.roots(key).await?.len());

    // Grant the opponent a token for re-fetching the first leaf
    let signing_key = OsSecretGenerator::os().generate_one()?;
    let first = ledger
        .roots(key)
        .await?
        .first()
        .context("no batches opened")?
        .batch_id;
    let token = issue_token(
        roller_id,
        opponent,
        CapabilityScope::Leaf { batch_id: first, index: 0 },
        300,
        signing_key.as_bytes(),
    )?;
    let claims = validate_token(&token, &roller_id, signing_key.as_bytes())?;
    if let CapabilityScope::Leaf { batch_id, index } = claims.grant {
        let leaf = ledger.reveal_leaf(key, batch_id, index).await?;
        info!("Capability holder {:?} re-fetched leaf {} (valid: {})", claims.holder()?, index, leaf.verify());
    }
    Ok(())
}
