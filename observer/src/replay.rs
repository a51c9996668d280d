//! Feed a recorded event file through a session without touching the chain.
//!
//! Each non-empty line is the JSON form of a [RawEvent]. Lines starting with
//! `#` are comments.

use crate::{
    engine::Snapshot,
    session::{Applied, Session},
};
use anyhow::{Context, Result};
use futures::StreamExt;
use shuffle_client::{Action, EventBridge, EventFilter, MemoryBridge};
use shuffle_types::{GameStatus, RawEvent};
use std::io::BufRead;
use tracing::{debug, info, warn};

/// Everything a replay produced, in order.
#[derive(Debug, Default)]
pub struct Replay {
    /// Session state after each decoded line.
    pub snapshots: Vec<Snapshot>,
    pub actions: Vec<Action>,
    /// Lines that were not valid JSON or did not decode to an event.
    pub malformed: usize,
}

/// Replay `reader` into `session`, seeding it (and re-seeding after every
/// rematch) with `initial`.
pub async fn replay(mut session: Session, initial: GameStatus, reader: impl BufRead) -> Result<Replay> {
    let bridge = MemoryBridge::new();
    // Subscribe to every game so each published line yields exactly one item
    let mut subscription = bridge.subscribe(EventFilter::default()).await?;
    // A fresh bridge has no backlog: the first item is the catch-up marker
    let _ = subscription.next().await;

    let mut replay = Replay::default();
    replay.actions.extend(session.seed(initial));

    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("failed to read line {number}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let raw: RawEvent = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(line = number, %err, "skipping unparseable line");
                replay.malformed += 1;
                continue;
            }
        };
        bridge.publish_raw(&raw);
        let Some(item) = subscription.next().await else {
            break;
        };

        let applied = session.handle(item);
        debug!(line = number, ?applied, "applied event");
        match applied {
            Applied::Changed(Some(action)) => replay.actions.push(action),
            Applied::Reset => replay.actions.extend(session.seed(initial)),
            Applied::Malformed => replay.malformed += 1,
            _ => {}
        }
        replay.snapshots.push(Snapshot::of(&session, None));
    }

    info!(
        events = replay.snapshots.len(),
        actions = replay.actions.len(),
        malformed = replay.malformed,
        "replay finished"
    );
    Ok(replay)
}
