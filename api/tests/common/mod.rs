#![allow(dead_code)]

use std::sync::Arc;

use api::deals::CreateDeal;
use api::schema::{build_schema, AppSchema, MutationRoot, QueryRoot, SubscriptionRoot};
use api::seed::{seed_pipeline_demo, SeededPipeline};
use api::stages::CreateStage;
use api::{EngineConfig, PipelineEngine};
use async_graphql::Schema;
use entity::{deal, stage};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, EntityTrait, PaginatorTrait, QueryFilter};
use sea_orm::ColumnTrait;
use uuid::Uuid;

pub struct TestContext {
    pub engine: Arc<PipelineEngine>,
    pub schema: Schema<QueryRoot, MutationRoot, SubscriptionRoot>,
}

/// Fresh in-memory database. A single pooled connection, so every handle
/// sees the same store.
pub async fn setup() -> TestContext {
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options.max_connections(1);
    let conn = Database::connect(options).await.expect("sqlite connect");
    Migrator::up(&conn, None).await.expect("migrations");
    let engine = Arc::new(PipelineEngine::new(Arc::new(conn), EngineConfig::default()));
    let AppSchema(schema) = build_schema(engine.clone());
    TestContext { engine, schema }
}

pub async fn setup_seeded() -> (TestContext, SeededPipeline) {
    let ctx = setup().await;
    let seeded = seed_pipeline_demo(ctx.engine.db()).await.expect("seed");
    (ctx, seeded)
}

pub async fn make_stage(
    engine: &PipelineEngine,
    name: &str,
    probability: i16,
    is_won: bool,
    is_lost: bool,
) -> stage::Model {
    engine
        .create_stage(CreateStage {
            name: name.to_string(),
            probability,
            color: None,
            rotten_days: None,
            is_won,
            is_lost,
        })
        .await
        .expect("create stage")
}

pub async fn make_deal(
    engine: &PipelineEngine,
    stage_id: Uuid,
    title: &str,
    value_cents: i64,
) -> deal::Model {
    engine
        .create_deal(CreateDeal {
            title: title.to_string(),
            stage_id,
            value_cents: Some(value_cents),
            currency: None,
            probability: None,
            expected_close_date: None,
            company_id: None,
            contact_id: None,
            visible_to: None,
            actor: None,
        })
        .await
        .expect("create deal")
}

/// The density invariant: ranks in a stage are exactly `0..n-1`.
pub async fn assert_dense(engine: &PipelineEngine, stage_id: Uuid) {
    let deals = api::deals::load_stage_deals(engine.db(), stage_id)
        .await
        .expect("load stage deals");
    for (rank, deal) in deals.iter().enumerate() {
        assert_eq!(
            deal.sort_order, rank as i32,
            "stage {stage_id} rank {rank} held by {} (sort_order {})",
            deal.title, deal.sort_order
        );
    }
}

pub async fn stage_titles(engine: &PipelineEngine, stage_id: Uuid) -> Vec<String> {
    api::deals::load_stage_deals(engine.db(), stage_id)
        .await
        .expect("load stage deals")
        .into_iter()
        .map(|d| d.title)
        .collect()
}

pub async fn live_deal_count(engine: &PipelineEngine) -> u64 {
    deal::Entity::find()
        .filter(deal::Column::IsDeleted.eq(false))
        .count(engine.db())
        .await
        .expect("count deals")
}

pub async fn reload_deal(engine: &PipelineEngine, id: Uuid) -> deal::Model {
    deal::Entity::find_by_id(id)
        .one(engine.db())
        .await
        .expect("load deal")
        .expect("deal exists")
}
