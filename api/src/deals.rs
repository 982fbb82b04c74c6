//! Deal store: creation, field edits, soft deletion and board reads.
//!
//! Stage membership and rank never change here — that is the move
//! operation's job.

use chrono::{NaiveDate, Utc};
use entity::{deal, deal_stage_history, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::feed::{ChangeKind, EventDraft};
use crate::locks::Partition;
use crate::ordering;
use crate::PipelineEngine;

const DEFAULT_CURRENCY: &str = "EUR";

#[derive(Clone, Debug)]
pub struct CreateDeal {
    pub title: String,
    pub stage_id: Uuid,
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    pub probability: Option<i16>,
    pub expected_close_date: Option<NaiveDate>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub visible_to: Option<deal::Visibility>,
    pub actor: Option<Uuid>,
}

/// Field patch; `None` leaves a field unchanged.
#[derive(Clone, Debug, Default)]
pub struct DealPatch {
    pub title: Option<String>,
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    pub probability: Option<i16>,
    pub expected_close_date: Option<NaiveDate>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub visible_to: Option<deal::Visibility>,
    pub actor: Option<Uuid>,
}

/// Read-model filters for the board query.
#[derive(Clone, Debug, Default)]
pub struct BoardFilter {
    pub stage_ids: Option<Vec<Uuid>>,
    pub company_id: Option<Uuid>,
}

fn validate_title(title: &str) -> PipelineResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::invalid("deal title must not be empty"));
    }
    if trimmed.len() > 256 {
        return Err(PipelineError::invalid("deal title too long"));
    }
    Ok(trimmed.to_string())
}

fn validate_value(value_cents: i64) -> PipelineResult<()> {
    if value_cents < 0 {
        return Err(PipelineError::invalid("deal value must not be negative"));
    }
    Ok(())
}

fn validate_deal_probability(probability: i16) -> PipelineResult<()> {
    if !(0..=100).contains(&probability) {
        return Err(PipelineError::invalid("probability must be within 0..=100"));
    }
    Ok(())
}

/// Live deals of one stage in rank order.
pub async fn load_stage_deals<C: ConnectionTrait>(
    conn: &C,
    stage_id: Uuid,
) -> PipelineResult<Vec<deal::Model>> {
    Ok(deal::Entity::find()
        .filter(deal::Column::StageId.eq(stage_id))
        .filter(deal::Column::IsDeleted.eq(false))
        .order_by_asc(deal::Column::SortOrder)
        .all(conn)
        .await?)
}

impl PipelineEngine {
    /// Create a deal at the tail of its stage's list.
    pub async fn create_deal(&self, input: CreateDeal) -> PipelineResult<deal::Model> {
        let title = validate_title(&input.title)?;
        if let Some(value) = input.value_cents {
            validate_value(value)?;
        }
        if let Some(probability) = input.probability {
            validate_deal_probability(probability)?;
        }

        let _guard = self.locks().lock(Partition::Deals(input.stage_id)).await;
        let txn = self.db().begin().await?;
        stage::Entity::find_by_id(input.stage_id)
            .one(&txn)
            .await?
            .ok_or(PipelineError::StageNotFound)?;

        let tail = ordering::len(&txn, Partition::Deals(input.stage_id)).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let created = deal::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title),
            value_cents: Set(input.value_cents),
            currency: Set(Some(
                input
                    .currency
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            )),
            stage_id: Set(input.stage_id),
            sort_order: Set(tail),
            probability: Set(input.probability),
            status: Set(deal::Status::Open),
            expected_close_date: Set(input.expected_close_date),
            actual_close_date: Set(None),
            stage_entered_at: Set(now),
            last_stage_id: Set(None),
            is_locked: Set(false),
            lost_reason: Set(None),
            company_id: Set(input.company_id),
            contact_id: Set(input.contact_id),
            visible_to: Set(input.visible_to.unwrap_or(deal::Visibility::Everyone)),
            is_deleted: Set(false),
            deleted_at: Set(None),
            created_by: Set(input.actor),
            updated_by: Set(input.actor),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(deal = %created.id, stage = %created.stage_id, rank = created.sort_order, "deal created");
        self.feed()
            .publish(ChangeKind::DealCreated, EventDraft::deals(vec![created.clone()]));
        Ok(created)
    }

    /// Patch descriptive fields. Status, close stamps, stage and rank are
    /// owned by the move operation and cannot be edited here.
    pub async fn update_deal(&self, id: Uuid, patch: DealPatch) -> PipelineResult<deal::Model> {
        let txn = self.db().begin().await?;
        let existing = deal::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .filter(|d| !d.is_deleted)
            .ok_or(PipelineError::DealNotFound)?;

        let mut active: deal::ActiveModel = existing.into();
        if let Some(title) = &patch.title {
            active.title = Set(validate_title(title)?);
        }
        if let Some(value) = patch.value_cents {
            validate_value(value)?;
            active.value_cents = Set(Some(value));
        }
        if let Some(currency) = patch.currency {
            active.currency = Set(Some(currency));
        }
        if let Some(probability) = patch.probability {
            validate_deal_probability(probability)?;
            active.probability = Set(Some(probability));
        }
        if let Some(expected) = patch.expected_close_date {
            active.expected_close_date = Set(Some(expected));
        }
        if let Some(company_id) = patch.company_id {
            active.company_id = Set(Some(company_id));
        }
        if let Some(contact_id) = patch.contact_id {
            active.contact_id = Set(Some(contact_id));
        }
        if let Some(visible_to) = patch.visible_to {
            active.visible_to = Set(visible_to);
        }
        active.updated_by = Set(patch.actor);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.feed()
            .publish(ChangeKind::DealUpdated, EventDraft::deals(vec![updated.clone()]));
        Ok(updated)
    }

    /// Soft-delete a deal and close the rank gap it leaves behind. The row
    /// is never purged; its history remains readable.
    pub async fn delete_deal(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<()> {
        // The owning partition is only known from the row itself, so peek
        // first and verify under the lock.
        loop {
            let peek = deal::Entity::find_by_id(id)
                .one(self.db())
                .await?
                .filter(|d| !d.is_deleted)
                .ok_or(PipelineError::DealNotFound)?;
            let partition = Partition::Deals(peek.stage_id);
            let _guard = self.locks().lock(partition).await;

            let txn = self.db().begin().await?;
            let existing = deal::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .filter(|d| !d.is_deleted)
                .ok_or(PipelineError::DealNotFound)?;
            if existing.stage_id != peek.stage_id {
                // Moved between peek and lock; take the lock for the stage
                // it actually lives in now.
                continue;
            }

            let vacated = existing.sort_order;
            let now: DateTimeWithTimeZone = Utc::now().into();
            let mut active: deal::ActiveModel = existing.into();
            active.is_deleted = Set(true);
            active.deleted_at = Set(Some(now));
            active.updated_by = Set(actor);
            active.updated_at = Set(now);
            let deleted = active.update(&txn).await?;

            ordering::close_gap(&txn, partition, vacated).await?;
            let shifted = deal::Entity::find()
                .filter(deal::Column::StageId.eq(deleted.stage_id))
                .filter(deal::Column::IsDeleted.eq(false))
                .filter(deal::Column::SortOrder.gte(vacated))
                .order_by_asc(deal::Column::SortOrder)
                .all(&txn)
                .await?;
            txn.commit().await?;

            info!(deal = %id, "deal deleted");
            self.feed().publish(
                ChangeKind::DealDeleted,
                EventDraft {
                    stages: vec![],
                    deals: shifted,
                    removed_stage_ids: vec![],
                    removed_deal_ids: vec![id],
                },
            );
            return Ok(());
        }
    }

    /// Full board read model: stages in order, each with its live deals in
    /// rank order, subject to the filter.
    pub async fn load_board(
        &self,
        filter: &BoardFilter,
    ) -> PipelineResult<Vec<(stage::Model, Vec<deal::Model>)>> {
        let stages = crate::stages::load_stages(self.db()).await?;
        let selected: Vec<stage::Model> = match &filter.stage_ids {
            Some(ids) => stages.into_iter().filter(|s| ids.contains(&s.id)).collect(),
            None => stages,
        };

        let mut query = deal::Entity::find()
            .filter(deal::Column::IsDeleted.eq(false))
            .order_by_asc(deal::Column::StageId)
            .order_by_asc(deal::Column::SortOrder);
        if let Some(company_id) = filter.company_id {
            query = query.filter(deal::Column::CompanyId.eq(company_id));
        }
        let deals = query.all(self.db()).await?;

        Ok(selected
            .into_iter()
            .map(|stage| {
                let members: Vec<deal::Model> = deals
                    .iter()
                    .filter(|d| d.stage_id == stage.id)
                    .cloned()
                    .collect();
                (stage, members)
            })
            .collect())
    }

    /// A deal's move history, newest first.
    pub async fn deal_history(
        &self,
        deal_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> PipelineResult<Vec<deal_stage_history::Model>> {
        deal::Entity::find_by_id(deal_id)
            .one(self.db())
            .await?
            .ok_or(PipelineError::DealNotFound)?;
        Ok(deal_stage_history::Entity::find()
            .filter(deal_stage_history::Column::DealId.eq(deal_id))
            .order_by_desc(deal_stage_history::Column::ChangedAt)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?)
    }
}
