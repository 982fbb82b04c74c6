//! Change feed.
//!
//! Every committed mutation is published as one `ChangeEvent` on a
//! broadcast channel. Events are published while the mutating partition
//! locks are still held, so subscribers observe commit order within any
//! partition; ordering across unrelated partitions is unspecified.
//!
//! The `deals` payload carries every row whose `stage_id` or `sort_order`
//! changed in the commit, not just the entity named by the operation —
//! client reconciliation depends on that completeness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use entity::{deal, stage};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const FEED_CAPACITY: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    StageCreated,
    StageUpdated,
    StagesReordered,
    StageDeleted,
    DealCreated,
    DealUpdated,
    DealMoved,
    DealDeleted,
}

#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// Monotone over the whole feed; dense within it.
    pub seq: u64,
    pub kind: ChangeKind,
    /// Stage rows whose fields (including rank) changed.
    pub stages: Vec<stage::Model>,
    /// Deal rows whose fields, rank, or stage membership changed.
    pub deals: Vec<deal::Model>,
    pub removed_stage_ids: Vec<Uuid>,
    pub removed_deal_ids: Vec<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Whether the event is relevant to a viewer filtered on one stage.
    /// A deal that just left the stage still matches via `last_stage_id`.
    pub fn touches_stage(&self, stage_id: Uuid) -> bool {
        self.stages.iter().any(|s| s.id == stage_id)
            || self.removed_stage_ids.contains(&stage_id)
            || self
                .deals
                .iter()
                .any(|d| d.stage_id == stage_id || d.last_stage_id == Some(stage_id))
    }
}

/// Payload of a publish, before the feed assigns its sequence number.
#[derive(Clone, Debug, Default)]
pub struct EventDraft {
    pub stages: Vec<stage::Model>,
    pub deals: Vec<deal::Model>,
    pub removed_stage_ids: Vec<Uuid>,
    pub removed_deal_ids: Vec<Uuid>,
}

impl EventDraft {
    pub fn deals(deals: Vec<deal::Model>) -> Self {
        Self {
            deals,
            ..Self::default()
        }
    }

    pub fn stages(stages: Vec<stage::Model>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }
}

pub struct ChangeFeed {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
    seq: AtomicU64,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.sender.subscribe()
    }

    /// Publish a committed delta. Returns the assigned sequence number.
    /// Send errors mean "no subscribers right now" and are not failures.
    pub(crate) fn publish(&self, kind: ChangeKind, draft: EventDraft) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Arc::new(ChangeEvent {
            seq,
            kind,
            stages: draft.stages,
            deals: draft.deals,
            removed_stage_ids: draft.removed_stage_ids,
            removed_deal_ids: draft.removed_deal_ids,
            occurred_at: Utc::now(),
        });
        let _ = self.sender.send(event);
        seq
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}
