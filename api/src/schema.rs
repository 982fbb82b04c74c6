//! GraphQL surface of the pipeline engine.

use std::sync::Arc;

use async_graphql::{
    Context, Enum, Error, ErrorExtensions, InputObject, Object, Schema, SimpleObject, Subscription,
    ID,
};
use chrono::{DateTime, NaiveDate, Utc};
use entity::{deal, deal_stage_history, stage};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::deals::{BoardFilter, CreateDeal, DealPatch};
use crate::error::PipelineError;
use crate::feed::{ChangeEvent, ChangeKind};
use crate::metrics;
use crate::moves::MoveDeal;
use crate::stages::{CreateStage, StagePatch};
use crate::PipelineEngine;

/// Opaque authenticated-actor id, supplied by the transport layer.
/// This core never authenticates anyone.
#[derive(Clone, Copy, Debug)]
pub struct Actor(pub Uuid);

pub struct AppSchema(pub Schema<QueryRoot, MutationRoot, SubscriptionRoot>);

pub fn build_schema(engine: Arc<PipelineEngine>) -> AppSchema {
    let schema = Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(engine)
        .finish();
    AppSchema(schema)
}

pub struct QueryRoot;
pub struct MutationRoot;
pub struct SubscriptionRoot;

const MAX_HISTORY_PAGE: i32 = 200;

#[Object]
impl QueryRoot {
    async fn pipeline(&self) -> PipelineQuery {
        PipelineQuery
    }
}

#[Object]
impl MutationRoot {
    async fn pipeline(&self) -> PipelineMutation {
        PipelineMutation
    }
}

#[derive(Default)]
pub struct PipelineQuery;

#[derive(Default)]
pub struct PipelineMutation;

#[Object]
impl PipelineQuery {
    async fn stages(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<StageNode>> {
        let engine = engine(ctx)?;
        let stages = crate::stages::load_stages(engine.db())
            .await
            .map_err(graphql_error)?;
        Ok(stages.iter().map(StageNode::from).collect())
    }

    /// The full board read model: stages in order, deals in rank order,
    /// with per-deal health flags and per-stage metrics computed on read.
    async fn board(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "stageIds")] stage_ids: Option<Vec<ID>>,
        #[graphql(name = "companyId")] company_id: Option<ID>,
    ) -> async_graphql::Result<BoardPayload> {
        let engine = engine(ctx)?;
        let filter = BoardFilter {
            stage_ids: match stage_ids {
                Some(ids) => Some(
                    ids.iter()
                        .map(parse_uuid)
                        .collect::<async_graphql::Result<Vec<_>>>()?,
                ),
                None => None,
            },
            company_id: match company_id {
                Some(id) => Some(parse_uuid(&id)?),
                None => None,
            },
        };
        let columns = engine.load_board(&filter).await.map_err(graphql_error)?;
        let now = Utc::now();
        let today = now.date_naive();
        let default_days = engine.config().rotten_days_default;

        let mut board_columns = Vec::with_capacity(columns.len());
        for (stage, deals) in &columns {
            let stage_metrics = metrics::stage_metrics(stage, deals);
            board_columns.push(BoardColumn {
                stage: StageNode::from(stage),
                metrics: StageMetricsNode::from(stage_metrics),
                deals: deals
                    .iter()
                    .map(|d| DealNode::from_parts(d, stage, now, today, default_days))
                    .collect(),
            });
        }
        let total_count = board_columns.iter().map(|c| c.metrics.count).sum();
        let total_value_cents = board_columns
            .iter()
            .map(|c| c.metrics.total_value_cents)
            .sum();
        let total_weighted_cents = board_columns
            .iter()
            .map(|c| c.metrics.weighted_value_cents)
            .sum();
        Ok(BoardPayload {
            columns: board_columns,
            total_count,
            total_value_cents,
            total_weighted_cents,
        })
    }

    #[graphql(name = "stageMetrics")]
    async fn stage_metrics(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "stageId")] stage_id: ID,
    ) -> async_graphql::Result<StageMetricsNode> {
        let engine = engine(ctx)?;
        let stage_uuid = parse_uuid(&stage_id)?;
        let stage = load_stage(&engine, stage_uuid).await?;
        let deals = crate::deals::load_stage_deals(engine.db(), stage_uuid)
            .await
            .map_err(graphql_error)?;
        Ok(StageMetricsNode::from(metrics::stage_metrics(&stage, &deals)))
    }

    #[graphql(name = "dealStageHistory")]
    async fn deal_stage_history(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "dealId")] deal_id: ID,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<DealStageHistoryNode>> {
        let engine = engine(ctx)?;
        let deal_uuid = parse_uuid(&deal_id)?;
        let limit = first.unwrap_or(50).clamp(1, MAX_HISTORY_PAGE) as u64;
        let skip = offset.unwrap_or(0).max(0) as u64;
        let rows = engine
            .deal_history(deal_uuid, limit, skip)
            .await
            .map_err(graphql_error)?;
        Ok(rows.into_iter().map(DealStageHistoryNode::from).collect())
    }
}

#[Object]
impl PipelineMutation {
    #[graphql(name = "createStage")]
    async fn create_stage(
        &self,
        ctx: &Context<'_>,
        input: NewStageInput,
    ) -> async_graphql::Result<StageNode> {
        require_actor(ctx)?;
        let engine = engine(ctx)?;
        let created = engine
            .create_stage(CreateStage {
                name: input.name,
                probability: input.probability,
                color: input.color,
                rotten_days: input.rotten_days,
                is_won: input.is_won.unwrap_or(false),
                is_lost: input.is_lost.unwrap_or(false),
            })
            .await
            .map_err(graphql_error)?;
        Ok(StageNode::from(&created))
    }

    #[graphql(name = "updateStage")]
    async fn update_stage(
        &self,
        ctx: &Context<'_>,
        input: UpdateStageInput,
    ) -> async_graphql::Result<StageNode> {
        require_actor(ctx)?;
        let engine = engine(ctx)?;
        let stage_id = parse_uuid(&input.id)?;
        let updated = engine
            .update_stage(
                stage_id,
                StagePatch {
                    name: input.name,
                    color: input.color,
                    probability: input.probability,
                    rotten_days: input.rotten_days,
                    is_won: input.is_won,
                    is_lost: input.is_lost,
                },
            )
            .await
            .map_err(graphql_error)?;
        Ok(StageNode::from(&updated))
    }

    #[graphql(name = "reorderStages")]
    async fn reorder_stages(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "orderedIds")] ordered_ids: Vec<ID>,
    ) -> async_graphql::Result<Vec<StageNode>> {
        require_actor(ctx)?;
        let engine = engine(ctx)?;
        let ids = ordered_ids
            .iter()
            .map(parse_uuid)
            .collect::<async_graphql::Result<Vec<_>>>()?;
        let stages = engine.reorder_stages(ids).await.map_err(graphql_error)?;
        Ok(stages.iter().map(StageNode::from).collect())
    }

    #[graphql(name = "deleteStage")]
    async fn delete_stage(
        &self,
        ctx: &Context<'_>,
        id: ID,
        #[graphql(name = "reassignTo")] reassign_to: Option<ID>,
    ) -> async_graphql::Result<bool> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let stage_id = parse_uuid(&id)?;
        let target = match reassign_to {
            Some(id) => Some(parse_uuid(&id)?),
            None => None,
        };
        engine
            .delete_stage(stage_id, target, Some(actor.0))
            .await
            .map_err(graphql_error)?;
        Ok(true)
    }

    #[graphql(name = "createDeal")]
    async fn create_deal(
        &self,
        ctx: &Context<'_>,
        input: NewDealInput,
    ) -> async_graphql::Result<DealNode> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let stage_id = parse_uuid(&input.stage_id)?;
        let created = engine
            .create_deal(CreateDeal {
                title: input.title,
                stage_id,
                value_cents: input.value_cents,
                currency: input.currency,
                probability: input.probability,
                expected_close_date: input.expected_close_date,
                company_id: parse_optional_uuid(&input.company_id)?,
                contact_id: parse_optional_uuid(&input.contact_id)?,
                visible_to: input.visible_to.map(deal::Visibility::from),
                actor: Some(actor.0),
            })
            .await
            .map_err(graphql_error)?;
        deal_node(&engine, created).await
    }

    #[graphql(name = "updateDeal")]
    async fn update_deal(
        &self,
        ctx: &Context<'_>,
        input: UpdateDealInput,
    ) -> async_graphql::Result<DealNode> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let deal_id = parse_uuid(&input.id)?;
        let updated = engine
            .update_deal(
                deal_id,
                DealPatch {
                    title: input.title,
                    value_cents: input.value_cents,
                    currency: input.currency,
                    probability: input.probability,
                    expected_close_date: input.expected_close_date,
                    company_id: parse_optional_uuid(&input.company_id)?,
                    contact_id: parse_optional_uuid(&input.contact_id)?,
                    visible_to: input.visible_to.map(deal::Visibility::from),
                    actor: Some(actor.0),
                },
            )
            .await
            .map_err(graphql_error)?;
        deal_node(&engine, updated).await
    }

    #[graphql(name = "deleteDeal")]
    async fn delete_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let deal_id = parse_uuid(&id)?;
        engine
            .delete_deal(deal_id, Some(actor.0))
            .await
            .map_err(graphql_error)?;
        Ok(true)
    }

    #[graphql(name = "moveDeal")]
    async fn move_deal(
        &self,
        ctx: &Context<'_>,
        input: MoveDealInput,
    ) -> async_graphql::Result<MoveResultNode> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let outcome = engine
            .move_deal(MoveDeal {
                deal_id: parse_uuid(&input.id)?,
                target_stage_id: parse_uuid(&input.stage_id)?,
                target_index: input.index,
                actor: Some(actor.0),
                note: input.note,
            })
            .await
            .map_err(graphql_error)?;
        let deal = deal_node(&engine, outcome.deal).await?;
        Ok(MoveResultNode {
            deal,
            from_stage: ID::from(outcome.from_stage.to_string()),
            from_index: outcome.from_index,
            to_stage: ID::from(outcome.to_stage.to_string()),
            to_index: outcome.to_index,
            event_seq: outcome.event_seq as i64,
        })
    }

    #[graphql(name = "reopenDeal")]
    async fn reopen_deal(
        &self,
        ctx: &Context<'_>,
        id: ID,
        #[graphql(name = "stageId")] stage_id: ID,
    ) -> async_graphql::Result<DealNode> {
        let actor = require_actor(ctx)?;
        let engine = engine(ctx)?;
        let outcome = engine
            .reopen_deal(parse_uuid(&id)?, parse_uuid(&stage_id)?, Some(actor.0))
            .await
            .map_err(graphql_error)?;
        deal_node(&engine, outcome.deal).await
    }
}

#[Subscription]
impl SubscriptionRoot {
    /// Committed board deltas, in commit order per stage partition. A
    /// subscriber that lags past the feed buffer should re-snapshot via
    /// the board query and resubscribe.
    #[graphql(name = "boardEvents")]
    async fn board_events(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "stageId")] stage_id: Option<ID>,
    ) -> async_graphql::Result<impl async_graphql::futures_util::Stream<Item = BoardEventNode>>
    {
        let engine = engine(ctx)?;
        let filter = match stage_id {
            Some(id) => Some(parse_uuid(&id)?),
            None => None,
        };
        let rx = engine.feed().subscribe();
        Ok(async_graphql::futures_util::stream::unfold(
            rx,
            move |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if let Some(stage_id) = filter {
                                if !event.touches_stage(stage_id) {
                                    continue;
                                }
                            }
                            return Some((BoardEventNode::from(event.as_ref()), rx));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        ))
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

impl From<deal::Status> for DealStatus {
    fn from(value: deal::Status) -> Self {
        match value {
            deal::Status::Open => DealStatus::Open,
            deal::Status::Won => DealStatus::Won,
            deal::Status::Lost => DealStatus::Lost,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum VisibleTo {
    Owner,
    Team,
    Everyone,
}

impl From<deal::Visibility> for VisibleTo {
    fn from(value: deal::Visibility) -> Self {
        match value {
            deal::Visibility::Owner => VisibleTo::Owner,
            deal::Visibility::Team => VisibleTo::Team,
            deal::Visibility::Everyone => VisibleTo::Everyone,
        }
    }
}

impl From<VisibleTo> for deal::Visibility {
    fn from(value: VisibleTo) -> Self {
        match value {
            VisibleTo::Owner => deal::Visibility::Owner,
            VisibleTo::Team => deal::Visibility::Team,
            VisibleTo::Everyone => deal::Visibility::Everyone,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum BoardEventKind {
    StageCreated,
    StageUpdated,
    StagesReordered,
    StageDeleted,
    DealCreated,
    DealUpdated,
    DealMoved,
    DealDeleted,
}

impl From<ChangeKind> for BoardEventKind {
    fn from(value: ChangeKind) -> Self {
        match value {
            ChangeKind::StageCreated => BoardEventKind::StageCreated,
            ChangeKind::StageUpdated => BoardEventKind::StageUpdated,
            ChangeKind::StagesReordered => BoardEventKind::StagesReordered,
            ChangeKind::StageDeleted => BoardEventKind::StageDeleted,
            ChangeKind::DealCreated => BoardEventKind::DealCreated,
            ChangeKind::DealUpdated => BoardEventKind::DealUpdated,
            ChangeKind::DealMoved => BoardEventKind::DealMoved,
            ChangeKind::DealDeleted => BoardEventKind::DealDeleted,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Stage")]
pub struct StageNode {
    pub id: ID,
    pub name: String,
    pub color: Option<String>,
    #[graphql(name = "sortOrder")]
    pub sort_order: i32,
    pub probability: i16,
    #[graphql(name = "isWon")]
    pub is_won: bool,
    #[graphql(name = "isLost")]
    pub is_lost: bool,
    #[graphql(name = "rottenDays")]
    pub rotten_days: Option<i32>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<&stage::Model> for StageNode {
    fn from(model: &stage::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            name: model.name.clone(),
            color: model.color.clone(),
            sort_order: model.sort_order,
            probability: model.probability,
            is_won: model.is_won,
            is_lost: model.is_lost,
            rotten_days: model.rotten_days,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

/// Board read model of a deal: raw row plus read-time health flags.
#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Deal")]
pub struct DealNode {
    pub id: ID,
    pub title: String,
    #[graphql(name = "valueCents")]
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    #[graphql(name = "stageId")]
    pub stage_id: ID,
    #[graphql(name = "sortOrder")]
    pub sort_order: i32,
    pub probability: Option<i16>,
    #[graphql(name = "effectiveProbability")]
    pub effective_probability: i16,
    pub status: DealStatus,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: Option<NaiveDate>,
    #[graphql(name = "actualCloseDate")]
    pub actual_close_date: Option<DateTime<Utc>>,
    #[graphql(name = "stageEnteredAt")]
    pub stage_entered_at: DateTime<Utc>,
    #[graphql(name = "lastStageId")]
    pub last_stage_id: Option<ID>,
    #[graphql(name = "isLocked")]
    pub is_locked: bool,
    #[graphql(name = "lostReason")]
    pub lost_reason: Option<String>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "visibleTo")]
    pub visible_to: VisibleTo,
    #[graphql(name = "daysInStage")]
    pub days_in_stage: i64,
    pub rotten: bool,
    pub overdue: bool,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl DealNode {
    fn from_parts(
        model: &deal::Model,
        stage: &stage::Model,
        now: DateTime<Utc>,
        today: NaiveDate,
        default_rotten_days: i64,
    ) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            title: model.title.clone(),
            value_cents: model.value_cents,
            currency: model.currency.clone(),
            stage_id: ID::from(model.stage_id.to_string()),
            sort_order: model.sort_order,
            probability: model.probability,
            effective_probability: metrics::effective_probability(model, stage),
            status: model.status.into(),
            expected_close_date: model.expected_close_date,
            actual_close_date: model.actual_close_date.map(|d| d.into()),
            stage_entered_at: model.stage_entered_at.into(),
            last_stage_id: model.last_stage_id.map(|id| ID::from(id.to_string())),
            is_locked: model.is_locked,
            lost_reason: model.lost_reason.clone(),
            company_id: model.company_id.map(|id| ID::from(id.to_string())),
            contact_id: model.contact_id.map(|id| ID::from(id.to_string())),
            visible_to: model.visible_to.into(),
            days_in_stage: metrics::days_in_stage(model, now),
            rotten: metrics::is_rotten(model, stage, now, default_rotten_days),
            overdue: metrics::is_overdue(model, today),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

/// Raw row delta carried by change-feed events. Health flags are derived
/// on read, not shipped with deltas.
#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "DealDelta")]
pub struct DealDeltaNode {
    pub id: ID,
    pub title: String,
    #[graphql(name = "valueCents")]
    pub value_cents: Option<i64>,
    #[graphql(name = "stageId")]
    pub stage_id: ID,
    #[graphql(name = "sortOrder")]
    pub sort_order: i32,
    pub status: DealStatus,
    #[graphql(name = "stageEnteredAt")]
    pub stage_entered_at: DateTime<Utc>,
    #[graphql(name = "lastStageId")]
    pub last_stage_id: Option<ID>,
    #[graphql(name = "isLocked")]
    pub is_locked: bool,
    #[graphql(name = "isDeleted")]
    pub is_deleted: bool,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<&deal::Model> for DealDeltaNode {
    fn from(model: &deal::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            title: model.title.clone(),
            value_cents: model.value_cents,
            stage_id: ID::from(model.stage_id.to_string()),
            sort_order: model.sort_order,
            status: model.status.into(),
            stage_entered_at: model.stage_entered_at.into(),
            last_stage_id: model.last_stage_id.map(|id| ID::from(id.to_string())),
            is_locked: model.is_locked,
            is_deleted: model.is_deleted,
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "StageMetrics")]
pub struct StageMetricsNode {
    pub count: i64,
    #[graphql(name = "totalValueCents")]
    pub total_value_cents: i64,
    #[graphql(name = "weightedValueCents")]
    pub weighted_value_cents: i64,
}

impl From<metrics::StageMetrics> for StageMetricsNode {
    fn from(value: metrics::StageMetrics) -> Self {
        Self {
            count: value.count,
            total_value_cents: value.total_value_cents,
            weighted_value_cents: value.weighted_value_cents,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct BoardColumn {
    pub stage: StageNode,
    pub metrics: StageMetricsNode,
    pub deals: Vec<DealNode>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct BoardPayload {
    pub columns: Vec<BoardColumn>,
    #[graphql(name = "totalCount")]
    pub total_count: i64,
    #[graphql(name = "totalValueCents")]
    pub total_value_cents: i64,
    #[graphql(name = "totalWeightedCents")]
    pub total_weighted_cents: i64,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "DealStageHistory")]
pub struct DealStageHistoryNode {
    pub id: ID,
    #[graphql(name = "dealId")]
    pub deal_id: ID,
    #[graphql(name = "fromStage")]
    pub from_stage: Option<ID>,
    #[graphql(name = "toStage")]
    pub to_stage: ID,
    #[graphql(name = "fromIndex")]
    pub from_index: Option<i32>,
    #[graphql(name = "toIndex")]
    pub to_index: i32,
    pub note: Option<String>,
    #[graphql(name = "changedBy")]
    pub changed_by: Option<ID>,
    #[graphql(name = "changedAt")]
    pub changed_at: DateTime<Utc>,
}

impl From<deal_stage_history::Model> for DealStageHistoryNode {
    fn from(model: deal_stage_history::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            from_stage: model.from_stage.map(|id| ID::from(id.to_string())),
            to_stage: ID::from(model.to_stage.to_string()),
            from_index: model.from_index,
            to_index: model.to_index,
            note: model.note,
            changed_by: model.changed_by.map(|id| ID::from(id.to_string())),
            changed_at: model.changed_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "MoveResult")]
pub struct MoveResultNode {
    pub deal: DealNode,
    #[graphql(name = "fromStage")]
    pub from_stage: ID,
    #[graphql(name = "fromIndex")]
    pub from_index: i32,
    #[graphql(name = "toStage")]
    pub to_stage: ID,
    #[graphql(name = "toIndex")]
    pub to_index: i32,
    #[graphql(name = "eventSeq")]
    pub event_seq: i64,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "BoardEvent")]
pub struct BoardEventNode {
    pub seq: i64,
    pub kind: BoardEventKind,
    pub stages: Vec<StageNode>,
    pub deals: Vec<DealDeltaNode>,
    #[graphql(name = "removedStageIds")]
    pub removed_stage_ids: Vec<ID>,
    #[graphql(name = "removedDealIds")]
    pub removed_deal_ids: Vec<ID>,
    #[graphql(name = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

impl From<&ChangeEvent> for BoardEventNode {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            seq: event.seq as i64,
            kind: event.kind.into(),
            stages: event.stages.iter().map(StageNode::from).collect(),
            deals: event.deals.iter().map(DealDeltaNode::from).collect(),
            removed_stage_ids: event
                .removed_stage_ids
                .iter()
                .map(|id| ID::from(id.to_string()))
                .collect(),
            removed_deal_ids: event
                .removed_deal_ids
                .iter()
                .map(|id| ID::from(id.to_string()))
                .collect(),
            occurred_at: event.occurred_at,
        }
    }
}

#[derive(InputObject, Clone)]
pub struct NewStageInput {
    pub name: String,
    pub probability: i16,
    pub color: Option<String>,
    #[graphql(name = "rottenDays")]
    pub rotten_days: Option<i32>,
    #[graphql(name = "isWon")]
    pub is_won: Option<bool>,
    #[graphql(name = "isLost")]
    pub is_lost: Option<bool>,
}

#[derive(InputObject, Clone)]
pub struct UpdateStageInput {
    pub id: ID,
    pub name: Option<String>,
    pub color: Option<String>,
    pub probability: Option<i16>,
    #[graphql(name = "rottenDays")]
    pub rotten_days: Option<i32>,
    #[graphql(name = "isWon")]
    pub is_won: Option<bool>,
    #[graphql(name = "isLost")]
    pub is_lost: Option<bool>,
}

#[derive(InputObject, Clone)]
pub struct NewDealInput {
    pub title: String,
    #[graphql(name = "stageId")]
    pub stage_id: ID,
    #[graphql(name = "valueCents")]
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    pub probability: Option<i16>,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: Option<NaiveDate>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "visibleTo")]
    pub visible_to: Option<VisibleTo>,
}

#[derive(InputObject, Clone)]
pub struct UpdateDealInput {
    pub id: ID,
    pub title: Option<String>,
    #[graphql(name = "valueCents")]
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    pub probability: Option<i16>,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: Option<NaiveDate>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "visibleTo")]
    pub visible_to: Option<VisibleTo>,
}

#[derive(InputObject, Clone)]
pub struct MoveDealInput {
    pub id: ID,
    #[graphql(name = "stageId")]
    pub stage_id: ID,
    pub index: i32,
    pub note: Option<String>,
}

fn error_with_code(code: &str, message: impl Into<String>) -> Error {
    let code = code.to_string();
    Error::new(message.into()).extend_with(|_, e| e.set("code", code.clone()))
}

fn graphql_error(err: PipelineError) -> Error {
    error_with_code(err.code(), err.to_string())
}

fn engine(ctx: &Context<'_>) -> async_graphql::Result<Arc<PipelineEngine>> {
    ctx.data::<Arc<PipelineEngine>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing pipeline engine"))
}

fn require_actor(ctx: &Context<'_>) -> async_graphql::Result<Actor> {
    ctx.data::<Actor>()
        .copied()
        .map_err(|_| error_with_code("UNAUTHENTICATED", "Actor id required"))
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| error_with_code("BAD_REQUEST", "Invalid ID"))
}

fn parse_optional_uuid(id: &Option<ID>) -> async_graphql::Result<Option<Uuid>> {
    match id {
        Some(id) => Ok(Some(parse_uuid(id)?)),
        None => Ok(None),
    }
}

async fn load_stage(
    engine: &Arc<PipelineEngine>,
    stage_id: Uuid,
) -> async_graphql::Result<stage::Model> {
    use sea_orm::EntityTrait;
    stage::Entity::find_by_id(stage_id)
        .one(engine.db())
        .await
        .map_err(|err| graphql_error(PipelineError::from(err)))?
        .ok_or_else(|| graphql_error(PipelineError::StageNotFound))
}

/// Enrich a freshly mutated deal with read-time health flags.
async fn deal_node(
    engine: &Arc<PipelineEngine>,
    model: deal::Model,
) -> async_graphql::Result<DealNode> {
    let stage = load_stage(engine, model.stage_id).await?;
    let now = Utc::now();
    Ok(DealNode::from_parts(
        &model,
        &stage,
        now,
        now.date_naive(),
        engine.config().rotten_days_default,
    ))
}
