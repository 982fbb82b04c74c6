//! The atomic deal-move operation.
//!
//! A move relocates one deal within or across stage lists, renumbers the
//! affected rank ranges, applies terminal-stage side effects, appends one
//! history record and publishes one change-feed event — all observably
//! atomic. Concurrent moves over overlapping partitions serialize on the
//! partition locks; the second mover recomputes its indices against the
//! first's committed state.

use chrono::Utc;
use entity::{deal, deal_stage_history, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::feed::{ChangeKind, EventDraft};
use crate::locks::Partition;
use crate::ordering;
use crate::PipelineEngine;

const MAX_MOVE_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct MoveDeal {
    pub deal_id: Uuid,
    pub target_stage_id: Uuid,
    /// Requested insertion index; clamped to the destination's size
    /// (post-removal when staying in the same stage).
    pub target_index: i32,
    pub actor: Option<Uuid>,
    /// Free-form annotation; recorded in history, and stored as the lost
    /// reason when the move enters the lost stage.
    pub note: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MoveOutcome {
    pub deal: deal::Model,
    pub from_stage: Uuid,
    pub from_index: i32,
    pub to_stage: Uuid,
    pub to_index: i32,
    pub event_seq: u64,
}

/// Side effects of entering a stage, driven entirely by the stage's
/// terminal flags. Entering a non-terminal stage changes nothing here.
pub(crate) fn apply_stage_entry_effects(
    active: &mut deal::ActiveModel,
    target: &stage::Model,
    note: Option<&str>,
    now: DateTimeWithTimeZone,
) {
    if target.is_won {
        active.status = Set(deal::Status::Won);
        active.actual_close_date = Set(Some(now));
        active.is_locked = Set(true);
    } else if target.is_lost {
        active.status = Set(deal::Status::Lost);
        active.actual_close_date = Set(Some(now));
        active.is_locked = Set(true);
        active.lost_reason = Set(note.map(str::to_string));
    }
}

impl PipelineEngine {
    /// Move a deal. `Conflict` is retried internally with the index
    /// re-clamped against fresh state before it is surfaced.
    pub async fn move_deal(&self, cmd: MoveDeal) -> PipelineResult<MoveOutcome> {
        self.run_move(cmd, false).await
    }

    /// Explicit unlock: reopen a closed deal into a non-terminal stage,
    /// appended at that stage's tail. Clears status, close stamp, lock and
    /// lost reason.
    pub async fn reopen_deal(
        &self,
        deal_id: Uuid,
        target_stage_id: Uuid,
        actor: Option<Uuid>,
    ) -> PipelineResult<MoveOutcome> {
        let peek = deal::Entity::find_by_id(deal_id)
            .one(self.db())
            .await?
            .filter(|d| !d.is_deleted)
            .ok_or(PipelineError::DealNotFound)?;
        if !peek.is_locked && peek.status == deal::Status::Open {
            return Err(PipelineError::invalid("deal is not closed"));
        }
        self.run_move(
            MoveDeal {
                deal_id,
                target_stage_id,
                target_index: i32::MAX,
                actor,
                note: None,
            },
            true,
        )
        .await
    }

    async fn run_move(&self, cmd: MoveDeal, unlock: bool) -> PipelineResult<MoveOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.move_deal_once(&cmd, unlock).await {
                Err(err) if err.is_retryable() && attempt < MAX_MOVE_ATTEMPTS => {
                    debug!(deal = %cmd.deal_id, attempt, "move conflicted, retrying");
                    continue;
                }
                result => return result,
            }
        }
    }

    async fn move_deal_once(&self, cmd: &MoveDeal, unlock: bool) -> PipelineResult<MoveOutcome> {
        // The source partition is only known from the row; peek without the
        // lock, then verify under it.
        let peek = deal::Entity::find_by_id(cmd.deal_id)
            .one(self.db())
            .await?
            .filter(|d| !d.is_deleted)
            .ok_or(PipelineError::DealNotFound)?;
        let source_stage_id = peek.stage_id;

        let _guards = self
            .locks()
            .lock_all(vec![
                Partition::Deals(source_stage_id),
                Partition::Deals(cmd.target_stage_id),
            ])
            .await;

        let txn = self.db().begin().await?;
        let current = deal::Entity::find_by_id(cmd.deal_id)
            .one(&txn)
            .await?
            .filter(|d| !d.is_deleted)
            .ok_or(PipelineError::DealNotFound)?;
        if current.stage_id != source_stage_id {
            // Raced with another move; our locks cover the wrong partition.
            return Err(PipelineError::Conflict);
        }
        let target = stage::Entity::find_by_id(cmd.target_stage_id)
            .one(&txn)
            .await?
            .ok_or(PipelineError::StageNotFound)?;
        if current.is_locked && !unlock {
            return Err(PipelineError::DealLocked);
        }
        if unlock && (target.is_won || target.is_lost) {
            return Err(PipelineError::invalid(
                "a reopened deal must move to a non-terminal stage",
            ));
        }

        let same_stage = source_stage_id == cmd.target_stage_id;
        let from_index = current.sort_order;
        let dest_len = {
            let len = ordering::len(&txn, Partition::Deals(cmd.target_stage_id)).await?;
            if same_stage {
                len - 1
            } else {
                len
            }
        };
        let to_index = ordering::clamp_index(cmd.target_index, dest_len);
        let now: DateTimeWithTimeZone = Utc::now().into();

        let updated = if same_stage && to_index == from_index {
            // No-op in effect; ranks and stage_entered_at stay untouched,
            // but the intent is still recorded.
            let mut active: deal::ActiveModel = current.into();
            active.updated_by = Set(cmd.actor);
            active.updated_at = Set(now);
            active.update(&txn).await?
        } else {
            if same_stage {
                if let Some(range) = ordering::reinsert_shift(from_index, to_index) {
                    ordering::shift(
                        &txn,
                        Partition::Deals(source_stage_id),
                        range.lo,
                        range.hi,
                        range.delta,
                    )
                    .await?;
                }
            } else {
                ordering::close_gap(&txn, Partition::Deals(source_stage_id), from_index).await?;
                ordering::open_gap(&txn, Partition::Deals(cmd.target_stage_id), to_index).await?;
            }

            let mut active: deal::ActiveModel = current.into();
            active.stage_id = Set(cmd.target_stage_id);
            active.sort_order = Set(to_index);
            active.updated_by = Set(cmd.actor);
            active.updated_at = Set(now);
            if !same_stage {
                active.last_stage_id = Set(Some(source_stage_id));
                active.stage_entered_at = Set(now);
                if unlock {
                    active.status = Set(deal::Status::Open);
                    active.actual_close_date = Set(None);
                    active.is_locked = Set(false);
                    active.lost_reason = Set(None);
                } else {
                    apply_stage_entry_effects(&mut active, &target, cmd.note.as_deref(), now);
                }
            }
            active.update(&txn).await?
        };

        deal_stage_history::Entity::insert(deal_stage_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            deal_id: Set(cmd.deal_id),
            from_stage: Set(Some(source_stage_id)),
            to_stage: Set(cmd.target_stage_id),
            from_index: Set(Some(from_index)),
            to_index: Set(to_index),
            note: Set(cmd.note.clone()),
            changed_by: Set(cmd.actor),
            changed_at: Set(now),
        })
        .exec_without_returning(&txn)
        .await?;

        // Every row whose stage_id or sort_order changed, for the feed.
        let changed = if same_stage {
            let lo = from_index.min(to_index);
            let hi = from_index.max(to_index);
            deal::Entity::find()
                .filter(deal::Column::StageId.eq(source_stage_id))
                .filter(deal::Column::IsDeleted.eq(false))
                .filter(deal::Column::SortOrder.gte(lo))
                .filter(deal::Column::SortOrder.lte(hi))
                .order_by_asc(deal::Column::SortOrder)
                .all(&txn)
                .await?
        } else {
            let mut rows = deal::Entity::find()
                .filter(deal::Column::StageId.eq(source_stage_id))
                .filter(deal::Column::IsDeleted.eq(false))
                .filter(deal::Column::SortOrder.gte(from_index))
                .order_by_asc(deal::Column::SortOrder)
                .all(&txn)
                .await?;
            rows.extend(
                deal::Entity::find()
                    .filter(deal::Column::StageId.eq(cmd.target_stage_id))
                    .filter(deal::Column::IsDeleted.eq(false))
                    .filter(deal::Column::SortOrder.gte(to_index))
                    .order_by_asc(deal::Column::SortOrder)
                    .all(&txn)
                    .await?,
            );
            rows
        };

        txn.commit().await?;

        // Published under the partition locks: subscribers see commit order
        // within each partition.
        let event_seq = self
            .feed()
            .publish(ChangeKind::DealMoved, EventDraft::deals(changed));

        info!(
            deal = %cmd.deal_id,
            from = %source_stage_id,
            to = %cmd.target_stage_id,
            from_index,
            to_index,
            "deal moved"
        );

        Ok(MoveOutcome {
            deal: updated,
            from_stage: source_stage_id,
            from_index,
            to_stage: cmd.target_stage_id,
            to_index,
            event_seq,
        })
    }
}
