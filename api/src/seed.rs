//! Demo data for local development and the integration tests.

use chrono::Utc;
use entity::{deal, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr};
use uuid::Uuid;

pub struct SeededPipeline {
    pub stages: Vec<stage::Model>,
    pub deals: Vec<deal::Model>,
}

impl SeededPipeline {
    pub fn stage_named(&self, name: &str) -> Option<&stage::Model> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn deal_titled(&self, title: &str) -> Option<&deal::Model> {
        self.deals.iter().find(|d| d.title == title)
    }
}

const DEFAULT_STAGES: [(&str, &str, i16, bool, bool); 6] = [
    ("Lead", "#94a3b8", 10, false, false),
    ("Qualified", "#38bdf8", 25, false, false),
    ("Proposal", "#a78bfa", 50, false, false),
    ("Negotiation", "#fbbf24", 70, false, false),
    ("Won", "#4ade80", 100, true, false),
    ("Lost", "#f87171", 0, false, true),
];

async fn insert_deal<C: ConnectionTrait>(
    conn: &C,
    stage: &stage::Model,
    sort_order: i32,
    title: &str,
    value_cents: i64,
    probability: Option<i16>,
) -> Result<deal::Model, DbErr> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let terminal = stage.is_won || stage.is_lost;
    let status = if stage.is_won {
        deal::Status::Won
    } else if stage.is_lost {
        deal::Status::Lost
    } else {
        deal::Status::Open
    };
    deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        value_cents: Set(Some(value_cents)),
        currency: Set(Some("EUR".to_string())),
        stage_id: Set(stage.id),
        sort_order: Set(sort_order),
        probability: Set(probability),
        status: Set(status),
        expected_close_date: Set(None),
        actual_close_date: Set(if terminal { Some(now) } else { None }),
        stage_entered_at: Set(now),
        last_stage_id: Set(None),
        is_locked: Set(terminal),
        lost_reason: Set(if stage.is_lost {
            Some("went with a competitor".to_string())
        } else {
            None
        }),
        company_id: Set(None),
        contact_id: Set(None),
        visible_to: Set(deal::Visibility::Everyone),
        is_deleted: Set(false),
        deleted_at: Set(None),
        created_by: Set(None),
        updated_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
}

/// Six default stages (one won, one lost) and a handful of deals.
pub async fn seed_pipeline_demo<C: ConnectionTrait>(conn: &C) -> Result<SeededPipeline, DbErr> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut stages = Vec::with_capacity(DEFAULT_STAGES.len());
    for (rank, (name, color, probability, is_won, is_lost)) in DEFAULT_STAGES.iter().enumerate() {
        let created = stage::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            color: Set(Some(color.to_string())),
            sort_order: Set(rank as i32),
            probability: Set(*probability),
            is_won: Set(*is_won),
            is_lost: Set(*is_lost),
            rotten_days: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
        stages.push(created);
    }

    let lead = stages[0].clone();
    let qualified = stages[1].clone();
    let proposal = stages[2].clone();
    let won = stages[4].clone();
    let lost = stages[5].clone();

    let deals = vec![
        insert_deal(conn, &lead, 0, "Website revamp", 150_000, None).await?,
        insert_deal(conn, &lead, 1, "Starter subscription", 45_000, None).await?,
        insert_deal(conn, &qualified, 0, "ACME rollout", 600_000, None).await?,
        insert_deal(conn, &proposal, 0, "Warehouse integration", 300_000, Some(40)).await?,
        insert_deal(conn, &won, 0, "Support retainer", 120_000, None).await?,
        insert_deal(conn, &lost, 0, "Legacy migration", 80_000, None).await?,
    ];

    Ok(SeededPipeline { stages, deals })
}
