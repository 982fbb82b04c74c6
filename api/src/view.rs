//! Client-side board cache.
//!
//! A `BoardView` is the reconciled local copy of the board a connected
//! viewer renders from: plain entity-id-keyed maps, updated by applying
//! change-feed events. The store is the sole authority — an event always
//! wins over whatever the view held for the rows it carries ("last
//! committed wins"), and there is no merge logic beyond that. A viewer
//! that lags past the feed's buffer re-snapshots and resubscribes.

use std::collections::HashMap;

use entity::{deal, stage};
use uuid::Uuid;

use crate::feed::ChangeEvent;

#[derive(Clone, Debug, Default)]
pub struct BoardView {
    stages: HashMap<Uuid, stage::Model>,
    deals: HashMap<Uuid, deal::Model>,
    last_seq: u64,
}

impl BoardView {
    pub fn from_snapshot(stages: Vec<stage::Model>, deals: Vec<deal::Model>) -> Self {
        Self {
            stages: stages.into_iter().map(|s| (s.id, s)).collect(),
            deals: deals
                .into_iter()
                .filter(|d| !d.is_deleted)
                .map(|d| (d.id, d))
                .collect(),
            last_seq: 0,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Merge one committed delta. Replayed or reordered duplicates of an
    /// already-applied event are ignored wholesale.
    pub fn apply(&mut self, event: &ChangeEvent) {
        if event.seq <= self.last_seq {
            return;
        }
        for stage in &event.stages {
            self.stages.insert(stage.id, stage.clone());
        }
        for deal in &event.deals {
            if deal.is_deleted {
                self.deals.remove(&deal.id);
            } else {
                self.deals.insert(deal.id, deal.clone());
            }
        }
        for id in &event.removed_stage_ids {
            self.stages.remove(id);
        }
        for id in &event.removed_deal_ids {
            self.deals.remove(id);
        }
        self.last_seq = event.seq;
    }

    pub fn stage(&self, id: Uuid) -> Option<&stage::Model> {
        self.stages.get(&id)
    }

    pub fn deal(&self, id: Uuid) -> Option<&deal::Model> {
        self.deals.get(&id)
    }

    pub fn deal_count(&self) -> usize {
        self.deals.len()
    }

    /// Stages in board order, each with its deals in rank order.
    pub fn columns(&self) -> Vec<(stage::Model, Vec<deal::Model>)> {
        let mut stages: Vec<stage::Model> = self.stages.values().cloned().collect();
        stages.sort_by_key(|s| s.sort_order);
        stages
            .into_iter()
            .map(|stage| {
                let mut deals: Vec<deal::Model> = self
                    .deals
                    .values()
                    .filter(|d| d.stage_id == stage.id)
                    .cloned()
                    .collect();
                deals.sort_by_key(|d| d.sort_order);
                (stage, deals)
            })
            .collect()
    }
}
