//! Stage registry: lifecycle and ordering of the board's columns.

use chrono::Utc;
use entity::stage;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::feed::{ChangeKind, EventDraft};
use crate::locks::Partition;
use crate::moves::apply_stage_entry_effects;
use crate::ordering;
use crate::PipelineEngine;

#[derive(Clone, Debug)]
pub struct CreateStage {
    pub name: String,
    pub probability: i16,
    pub color: Option<String>,
    pub rotten_days: Option<i32>,
    pub is_won: bool,
    pub is_lost: bool,
}

/// Field patch; `None` leaves a field unchanged.
#[derive(Clone, Debug, Default)]
pub struct StagePatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub probability: Option<i16>,
    pub rotten_days: Option<i32>,
    pub is_won: Option<bool>,
    pub is_lost: Option<bool>,
}

/// All stages in board order.
pub async fn load_stages<C: ConnectionTrait>(conn: &C) -> PipelineResult<Vec<stage::Model>> {
    Ok(stage::Entity::find()
        .order_by_asc(stage::Column::SortOrder)
        .all(conn)
        .await?)
}

fn validate_name(name: &str) -> PipelineResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::invalid("stage name must not be empty"));
    }
    if trimmed.len() > 64 {
        return Err(PipelineError::invalid("stage name too long"));
    }
    Ok(trimmed.to_string())
}

fn validate_probability(probability: i16) -> PipelineResult<()> {
    if !(0..=100).contains(&probability) {
        return Err(PipelineError::invalid("probability must be within 0..=100"));
    }
    Ok(())
}

/// At most one stage may carry each terminal flag. Checked under the stage
/// partition lock, so two concurrent creates cannot both slip through.
async fn ensure_single_terminal<C: ConnectionTrait>(
    conn: &C,
    exclude: Option<Uuid>,
    is_won: bool,
    is_lost: bool,
) -> PipelineResult<()> {
    if is_won && is_lost {
        return Err(PipelineError::invalid(
            "a stage cannot be both won and lost",
        ));
    }
    for (flag, column, label) in [
        (is_won, stage::Column::IsWon, "won"),
        (is_lost, stage::Column::IsLost, "lost"),
    ] {
        if !flag {
            continue;
        }
        let mut query = stage::Entity::find().filter(column.eq(true));
        if let Some(id) = exclude {
            query = query.filter(stage::Column::Id.ne(id));
        }
        if query.count(conn).await? > 0 {
            return Err(PipelineError::invalid(format!(
                "a {label} stage already exists"
            )));
        }
    }
    Ok(())
}

impl PipelineEngine {
    pub async fn create_stage(&self, input: CreateStage) -> PipelineResult<stage::Model> {
        let name = validate_name(&input.name)?;
        validate_probability(input.probability)?;

        let _guard = self.locks().lock(Partition::Stages).await;
        let txn = self.db().begin().await?;
        ensure_single_terminal(&txn, None, input.is_won, input.is_lost).await?;

        let tail = ordering::len(&txn, Partition::Stages).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let created = stage::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            color: Set(input.color),
            sort_order: Set(tail),
            probability: Set(input.probability),
            is_won: Set(input.is_won),
            is_lost: Set(input.is_lost),
            rotten_days: Set(input.rotten_days),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(stage = %created.id, rank = created.sort_order, "stage created");
        self.feed()
            .publish(ChangeKind::StageCreated, EventDraft::stages(vec![created.clone()]));
        Ok(created)
    }

    pub async fn update_stage(&self, id: Uuid, patch: StagePatch) -> PipelineResult<stage::Model> {
        let _guard = self.locks().lock(Partition::Stages).await;
        let txn = self.db().begin().await?;
        let existing = stage::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(PipelineError::StageNotFound)?;

        let is_won = patch.is_won.unwrap_or(existing.is_won);
        let is_lost = patch.is_lost.unwrap_or(existing.is_lost);
        ensure_single_terminal(&txn, Some(id), is_won, is_lost).await?;

        let mut active: stage::ActiveModel = existing.into();
        if let Some(name) = &patch.name {
            active.name = Set(validate_name(name)?);
        }
        if let Some(color) = patch.color {
            active.color = Set(Some(color));
        }
        if let Some(probability) = patch.probability {
            validate_probability(probability)?;
            active.probability = Set(probability);
        }
        if let Some(rotten_days) = patch.rotten_days {
            if rotten_days <= 0 {
                return Err(PipelineError::invalid("rotten_days must be positive"));
            }
            active.rotten_days = Set(Some(rotten_days));
        }
        // Terminal-flag edits never retroactively touch deals already in
        // the stage; they only change what future entries do.
        active.is_won = Set(is_won);
        active.is_lost = Set(is_lost);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.feed()
            .publish(ChangeKind::StageUpdated, EventDraft::stages(vec![updated.clone()]));
        Ok(updated)
    }

    /// Bulk re-rank. `ordered_ids` must be a permutation of every current
    /// stage id; the whole reorder commits or nothing does.
    pub async fn reorder_stages(&self, ordered_ids: Vec<Uuid>) -> PipelineResult<Vec<stage::Model>> {
        let _guard = self.locks().lock(Partition::Stages).await;
        let txn = self.db().begin().await?;
        let current = load_stages(&txn).await?;

        if ordered_ids.len() != current.len() {
            return Err(PipelineError::invalid(
                "reorder must list every stage exactly once",
            ));
        }
        let mut seen = std::collections::HashSet::with_capacity(ordered_ids.len());
        for id in &ordered_ids {
            if !seen.insert(*id) {
                return Err(PipelineError::invalid("reorder contains a duplicate stage"));
            }
            if !current.iter().any(|s| s.id == *id) {
                return Err(PipelineError::StageNotFound);
            }
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        for (rank, id) in ordered_ids.iter().enumerate() {
            let model = current
                .iter()
                .find(|s| s.id == *id)
                .ok_or(PipelineError::StageNotFound)?;
            if model.sort_order == rank as i32 {
                continue;
            }
            let mut active: stage::ActiveModel = model.clone().into();
            active.sort_order = Set(rank as i32);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }
        let reordered = load_stages(&txn).await?;
        txn.commit().await?;

        info!(stages = reordered.len(), "stages reordered");
        self.feed()
            .publish(ChangeKind::StagesReordered, EventDraft::stages(reordered.clone()));
        Ok(reordered)
    }

    /// Delete a stage. A stage that still holds deals requires a
    /// `reassign_to` target; its deals are appended to the target's tail in
    /// their current order, with the target's entry side effects applied,
    /// all in the same transaction.
    pub async fn delete_stage(
        &self,
        id: Uuid,
        reassign_to: Option<Uuid>,
        actor: Option<Uuid>,
    ) -> PipelineResult<()> {
        let mut partitions = vec![Partition::Stages, Partition::Deals(id)];
        if let Some(target) = reassign_to {
            partitions.push(Partition::Deals(target));
        }
        let _guards = self.locks().lock_all(partitions).await;

        let txn = self.db().begin().await?;
        let stage_row = stage::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(PipelineError::StageNotFound)?;

        let members = entity::deal::Entity::find()
            .filter(entity::deal::Column::StageId.eq(id))
            .filter(entity::deal::Column::IsDeleted.eq(false))
            .order_by_asc(entity::deal::Column::SortOrder)
            .all(&txn)
            .await?;

        let mut moved = Vec::with_capacity(members.len());
        if !members.is_empty() {
            // Reassignment may not smuggle locked deals across stages.
            if members.iter().any(|m| m.is_locked) {
                return Err(PipelineError::DealLocked);
            }
            let target_id = reassign_to.ok_or(PipelineError::StageNotEmpty)?;
            if target_id == id {
                return Err(PipelineError::invalid(
                    "cannot reassign deals to the stage being deleted",
                ));
            }
            let target = stage::Entity::find_by_id(target_id)
                .one(&txn)
                .await?
                .ok_or(PipelineError::StageNotFound)?;
            let tail = ordering::len(&txn, Partition::Deals(target_id)).await?;
            let now: DateTimeWithTimeZone = Utc::now().into();

            for (offset, member) in members.into_iter().enumerate() {
                let from_index = member.sort_order;
                let mut active: entity::deal::ActiveModel = member.into();
                active.stage_id = Set(target_id);
                active.sort_order = Set(tail + offset as i32);
                active.last_stage_id = Set(Some(id));
                active.stage_entered_at = Set(now);
                active.updated_by = Set(actor);
                active.updated_at = Set(now);
                apply_stage_entry_effects(&mut active, &target, None, now);
                let updated = active.update(&txn).await?;

                entity::deal_stage_history::Entity::insert(
                    entity::deal_stage_history::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        deal_id: Set(updated.id),
                        from_stage: Set(Some(id)),
                        to_stage: Set(target_id),
                        from_index: Set(Some(from_index)),
                        to_index: Set(updated.sort_order),
                        note: Set(Some("stage deleted".to_string())),
                        changed_by: Set(actor),
                        changed_at: Set(now),
                    },
                )
                .exec_without_returning(&txn)
                .await?;
                moved.push(updated);
            }
        }

        stage::Entity::delete_by_id(id).exec(&txn).await?;
        ordering::close_gap(&txn, Partition::Stages, stage_row.sort_order).await?;
        let shifted = stage::Entity::find()
            .filter(stage::Column::SortOrder.gte(stage_row.sort_order))
            .order_by_asc(stage::Column::SortOrder)
            .all(&txn)
            .await?;
        txn.commit().await?;

        info!(stage = %id, reassigned = moved.len(), "stage deleted");
        self.feed().publish(
            ChangeKind::StageDeleted,
            EventDraft {
                stages: shifted,
                deals: moved,
                removed_stage_ids: vec![id],
                removed_deal_ids: vec![],
            },
        );
        Ok(())
    }
}
