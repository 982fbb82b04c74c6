mod common;

use api::moves::MoveDeal;
use api::PipelineError;
use common::{
    assert_dense, live_deal_count, make_deal, make_stage, reload_deal, setup, stage_titles,
};
use entity::{deal, deal_stage_history};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

fn move_cmd(deal_id: Uuid, stage_id: Uuid, index: i32) -> MoveDeal {
    MoveDeal {
        deal_id,
        target_stage_id: stage_id,
        target_index: index,
        actor: None,
        note: None,
    }
}

#[tokio::test]
async fn moving_into_won_stage_closes_and_locks() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let won = make_stage(&ctx.engine, "Won", 100, true, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 10_000).await;
    let _d2 = make_deal(&ctx.engine, lead.id, "d2", 20_000).await;

    let outcome = ctx
        .engine
        .move_deal(move_cmd(d1.id, won.id, 0))
        .await
        .expect("move");

    assert_eq!(outcome.from_index, 0);
    assert_eq!(outcome.to_index, 0);
    assert_eq!(stage_titles(&ctx.engine, lead.id).await, vec!["d2"]);
    assert_eq!(stage_titles(&ctx.engine, won.id).await, vec!["d1"]);
    assert_dense(&ctx.engine, lead.id).await;
    assert_dense(&ctx.engine, won.id).await;

    let moved = reload_deal(&ctx.engine, d1.id).await;
    assert_eq!(moved.status, deal::Status::Won);
    assert!(moved.actual_close_date.is_some());
    assert!(moved.is_locked);
    assert_eq!(moved.last_stage_id, Some(lead.id));
}

#[tokio::test]
async fn reinserting_at_head_shifts_the_rest() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    for title in ["d1", "d2", "d3"] {
        make_deal(&ctx.engine, lead.id, title, 1_000).await;
    }
    let d3 = api::deals::load_stage_deals(ctx.engine.db(), lead.id)
        .await
        .expect("load")
        .pop()
        .expect("d3");

    let before = reload_deal(&ctx.engine, d3.id).await.stage_entered_at;
    ctx.engine
        .move_deal(move_cmd(d3.id, lead.id, 0))
        .await
        .expect("move");

    assert_eq!(stage_titles(&ctx.engine, lead.id).await, vec!["d3", "d1", "d2"]);
    assert_dense(&ctx.engine, lead.id).await;
    // Same stage: the staleness clock must not reset.
    let after = reload_deal(&ctx.engine, d3.id).await.stage_entered_at;
    assert_eq!(before, after);
}

#[tokio::test]
async fn noop_move_keeps_ranks_but_records_history() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    make_deal(&ctx.engine, lead.id, "d1", 1_000).await;
    let d2 = make_deal(&ctx.engine, lead.id, "d2", 2_000).await;

    let history_before = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(d2.id))
        .count(ctx.engine.db())
        .await
        .expect("count history");

    let outcome = ctx
        .engine
        .move_deal(move_cmd(d2.id, lead.id, 1))
        .await
        .expect("move");
    assert_eq!(outcome.from_index, 1);
    assert_eq!(outcome.to_index, 1);

    assert_eq!(stage_titles(&ctx.engine, lead.id).await, vec!["d1", "d2"]);
    let reloaded = reload_deal(&ctx.engine, d2.id).await;
    assert_eq!(reloaded.stage_entered_at, d2.stage_entered_at);
    assert_eq!(reloaded.sort_order, 1);

    let history_after = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(d2.id))
        .count(ctx.engine.db())
        .await
        .expect("count history");
    assert_eq!(history_after, history_before + 1);
}

#[tokio::test]
async fn out_of_range_index_clamps_to_tail() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let other = make_stage(&ctx.engine, "Qualified", 25, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;
    make_deal(&ctx.engine, other.id, "q1", 1_000).await;

    let outcome = ctx
        .engine
        .move_deal(move_cmd(d1.id, other.id, 99))
        .await
        .expect("move");
    assert_eq!(outcome.to_index, 1);

    let negative = make_deal(&ctx.engine, lead.id, "d2", 1_000).await;
    let outcome = ctx
        .engine
        .move_deal(move_cmd(negative.id, other.id, -5))
        .await
        .expect("move");
    assert_eq!(outcome.to_index, 0);
    assert_dense(&ctx.engine, other.id).await;
}

#[tokio::test]
async fn locked_deal_refuses_to_move_until_reopened() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let won = make_stage(&ctx.engine, "Won", 100, true, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 10_000).await;

    ctx.engine
        .move_deal(move_cmd(d1.id, won.id, 0))
        .await
        .expect("close");

    let err = ctx
        .engine
        .move_deal(move_cmd(d1.id, lead.id, 0))
        .await
        .expect_err("locked deal moved");
    assert!(matches!(err, PipelineError::DealLocked));

    // Even reordering inside the terminal stage is refused.
    let err = ctx
        .engine
        .move_deal(move_cmd(d1.id, won.id, 0))
        .await
        .expect_err("locked deal reordered");
    assert!(matches!(err, PipelineError::DealLocked));

    let outcome = ctx
        .engine
        .reopen_deal(d1.id, lead.id, None)
        .await
        .expect("reopen");
    assert_eq!(outcome.to_index, 0);
    let reopened = reload_deal(&ctx.engine, d1.id).await;
    assert_eq!(reopened.status, deal::Status::Open);
    assert!(!reopened.is_locked);
    assert!(reopened.actual_close_date.is_none());
    assert!(reopened.lost_reason.is_none());

    // Movable again.
    ctx.engine
        .move_deal(move_cmd(d1.id, won.id, 0))
        .await
        .expect("move after reopen");
}

#[tokio::test]
async fn reopen_into_terminal_stage_is_rejected() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let won = make_stage(&ctx.engine, "Won", 100, true, false).await;
    let lost = make_stage(&ctx.engine, "Lost", 0, false, true).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 10_000).await;
    ctx.engine
        .move_deal(move_cmd(d1.id, won.id, 0))
        .await
        .expect("close");

    let err = ctx
        .engine
        .reopen_deal(d1.id, lost.id, None)
        .await
        .expect_err("reopened into terminal stage");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[tokio::test]
async fn losing_move_records_the_reason() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let lost = make_stage(&ctx.engine, "Lost", 0, false, true).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 10_000).await;

    ctx.engine
        .move_deal(MoveDeal {
            deal_id: d1.id,
            target_stage_id: lost.id,
            target_index: 0,
            actor: None,
            note: Some("budget cut".to_string()),
        })
        .await
        .expect("move");

    let closed = reload_deal(&ctx.engine, d1.id).await;
    assert_eq!(closed.status, deal::Status::Lost);
    assert_eq!(closed.lost_reason.as_deref(), Some("budget cut"));
}

#[tokio::test]
async fn density_and_conservation_hold_across_a_move_sequence() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let qualified = make_stage(&ctx.engine, "Qualified", 25, false, false).await;
    let proposal = make_stage(&ctx.engine, "Proposal", 50, false, false).await;
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(make_deal(&ctx.engine, lead.id, &format!("deal-{i}"), 1_000).await.id);
    }
    assert_eq!(live_deal_count(&ctx.engine).await, 6);

    let script = [
        (ids[0], qualified.id, 0),
        (ids[3], qualified.id, 1),
        (ids[5], proposal.id, 0),
        (ids[1], proposal.id, 0),
        (ids[3], qualified.id, 0),
        (ids[2], lead.id, 0),
        (ids[0], lead.id, 2),
        (ids[4], proposal.id, 1),
    ];
    for (deal_id, stage_id, index) in script {
        ctx.engine
            .move_deal(move_cmd(deal_id, stage_id, index))
            .await
            .expect("scripted move");
    }

    for stage_id in [lead.id, qualified.id, proposal.id] {
        assert_dense(&ctx.engine, stage_id).await;
    }
    assert_eq!(live_deal_count(&ctx.engine).await, 6);
}

#[tokio::test]
async fn concurrent_moves_into_one_stage_both_commit() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let dx = make_deal(&ctx.engine, lead.id, "dx", 1_000).await;
    let dy = make_deal(&ctx.engine, lead.id, "dy", 1_000).await;
    make_deal(&ctx.engine, lead.id, "dz", 1_000).await;

    let engine_a = ctx.engine.clone();
    let engine_b = ctx.engine.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { engine_a.move_deal(move_cmd(dx.id, lead.id, 1)).await }),
        tokio::spawn(async move { engine_b.move_deal(move_cmd(dy.id, lead.id, 1)).await }),
    );
    first.expect("join").expect("move dx");
    second.expect("join").expect("move dy");

    // Relative order of dx and dy is whichever commit came second, but the
    // partition must still be a dense total order over all three deals.
    assert_dense(&ctx.engine, lead.id).await;
    assert_eq!(live_deal_count(&ctx.engine).await, 3);
}

#[tokio::test]
async fn missing_deal_and_stage_are_terminal_errors() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;

    let err = ctx
        .engine
        .move_deal(move_cmd(Uuid::new_v4(), lead.id, 0))
        .await
        .expect_err("moved a ghost");
    assert!(matches!(err, PipelineError::DealNotFound));

    let err = ctx
        .engine
        .move_deal(move_cmd(d1.id, Uuid::new_v4(), 0))
        .await
        .expect_err("moved into a ghost stage");
    assert!(matches!(err, PipelineError::StageNotFound));
}

#[tokio::test]
async fn soft_deleted_deal_cannot_move_and_leaves_no_gap() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;
    make_deal(&ctx.engine, lead.id, "d2", 1_000).await;
    make_deal(&ctx.engine, lead.id, "d3", 1_000).await;

    ctx.engine.delete_deal(d1.id, None).await.expect("delete");
    assert_eq!(stage_titles(&ctx.engine, lead.id).await, vec!["d2", "d3"]);
    assert_dense(&ctx.engine, lead.id).await;

    let err = ctx
        .engine
        .move_deal(move_cmd(d1.id, lead.id, 0))
        .await
        .expect_err("moved a deleted deal");
    assert!(matches!(err, PipelineError::DealNotFound));

    // The row survives for audit, flagged deleted.
    let row = deal::Entity::find_by_id(d1.id)
        .one(ctx.engine.db())
        .await
        .expect("query")
        .expect("row kept");
    assert!(row.is_deleted);
    assert!(row.deleted_at.is_some());
}

#[tokio::test]
async fn history_records_every_hop() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let qualified = make_stage(&ctx.engine, "Qualified", 25, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;

    ctx.engine
        .move_deal(move_cmd(d1.id, qualified.id, 0))
        .await
        .expect("first hop");
    ctx.engine
        .move_deal(move_cmd(d1.id, lead.id, 0))
        .await
        .expect("second hop");

    let history = ctx
        .engine
        .deal_history(d1.id, 10, 0)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    // Newest first.
    assert_eq!(history[0].from_stage, Some(qualified.id));
    assert_eq!(history[0].to_stage, lead.id);
    assert_eq!(history[1].from_stage, Some(lead.id));
    assert_eq!(history[1].to_stage, qualified.id);
}
