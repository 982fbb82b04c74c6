mod common;

use api::moves::MoveDeal;
use api::stages::{load_stages, CreateStage, StagePatch};
use api::PipelineError;
use common::{assert_dense, make_deal, make_stage, setup, stage_titles};
use uuid::Uuid;

#[tokio::test]
async fn stages_append_at_the_tail() {
    let ctx = setup().await;
    for (rank, name) in ["Lead", "Qualified", "Proposal"].iter().enumerate() {
        let created = make_stage(&ctx.engine, name, 10, false, false).await;
        assert_eq!(created.sort_order, rank as i32);
    }
    let stages = load_stages(ctx.engine.db()).await.expect("load");
    let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Lead", "Qualified", "Proposal"]);
}

#[tokio::test]
async fn probability_is_bounded() {
    let ctx = setup().await;
    let err = ctx
        .engine
        .create_stage(CreateStage {
            name: "Bad".to_string(),
            probability: 120,
            color: None,
            rotten_days: None,
            is_won: false,
            is_lost: false,
        })
        .await
        .expect_err("created stage with probability 120");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[tokio::test]
async fn only_one_won_and_one_lost_stage() {
    let ctx = setup().await;
    make_stage(&ctx.engine, "Won", 100, true, false).await;
    let err = ctx
        .engine
        .create_stage(CreateStage {
            name: "Won again".to_string(),
            probability: 100,
            color: None,
            rotten_days: None,
            is_won: true,
            is_lost: false,
        })
        .await
        .expect_err("second won stage");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));

    // Flipping an existing stage into a second terminal is refused too.
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let err = ctx
        .engine
        .update_stage(
            lead.id,
            StagePatch {
                is_won: Some(true),
                ..StagePatch::default()
            },
        )
        .await
        .expect_err("patched into second won stage");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[tokio::test]
async fn update_patches_fields_without_touching_deals() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;

    let updated = ctx
        .engine
        .update_stage(
            lead.id,
            StagePatch {
                name: Some("Inbound".to_string()),
                probability: Some(15),
                rotten_days: Some(14),
                ..StagePatch::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.name, "Inbound");
    assert_eq!(updated.probability, 15);
    assert_eq!(updated.rotten_days, Some(14));

    let untouched = common::reload_deal(&ctx.engine, d1.id).await;
    assert_eq!(untouched.stage_id, lead.id);
    assert_eq!(untouched.sort_order, 0);
}

#[tokio::test]
async fn reorder_is_all_or_nothing() {
    let ctx = setup().await;
    let a = make_stage(&ctx.engine, "A", 10, false, false).await;
    let b = make_stage(&ctx.engine, "B", 20, false, false).await;
    let c = make_stage(&ctx.engine, "C", 30, false, false).await;

    let reordered = ctx
        .engine
        .reorder_stages(vec![c.id, a.id, b.id])
        .await
        .expect("reorder");
    let names: Vec<&str> = reordered.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["C", "A", "B"]);
    for (rank, stage) in reordered.iter().enumerate() {
        assert_eq!(stage.sort_order, rank as i32);
    }

    // A partial list must change nothing.
    let err = ctx
        .engine
        .reorder_stages(vec![a.id, b.id])
        .await
        .expect_err("partial reorder accepted");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
    let unchanged = load_stages(ctx.engine.db()).await.expect("load");
    let names: Vec<&str> = unchanged.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["C", "A", "B"]);

    let err = ctx
        .engine
        .reorder_stages(vec![a.id, b.id, Uuid::new_v4()])
        .await
        .expect_err("unknown stage accepted");
    assert!(matches!(err, PipelineError::StageNotFound));

    let err = ctx
        .engine
        .reorder_stages(vec![a.id, b.id, b.id])
        .await
        .expect_err("duplicate stage accepted");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[tokio::test]
async fn deleting_nonempty_stage_requires_reassignment() {
    let ctx = setup().await;
    let doomed = make_stage(&ctx.engine, "Doomed", 10, false, false).await;
    let target = make_stage(&ctx.engine, "Target", 20, false, false).await;
    let trailing = make_stage(&ctx.engine, "Trailing", 30, false, false).await;
    make_deal(&ctx.engine, doomed.id, "d1", 1_000).await;
    make_deal(&ctx.engine, doomed.id, "d2", 2_000).await;
    make_deal(&ctx.engine, target.id, "t1", 3_000).await;

    let err = ctx
        .engine
        .delete_stage(doomed.id, None, None)
        .await
        .expect_err("deleted a non-empty stage");
    assert!(matches!(err, PipelineError::StageNotEmpty));

    ctx.engine
        .delete_stage(doomed.id, Some(target.id), None)
        .await
        .expect("delete with reassignment");

    // Both deals appended at the target's tail, in their source order.
    assert_eq!(
        stage_titles(&ctx.engine, target.id).await,
        vec!["t1", "d1", "d2"]
    );
    assert_dense(&ctx.engine, target.id).await;

    let stages = load_stages(ctx.engine.db()).await.expect("load");
    assert!(stages.iter().all(|s| s.id != doomed.id));
    for (rank, stage) in stages.iter().enumerate() {
        assert_eq!(stage.sort_order, rank as i32);
    }
    assert_eq!(stages.last().expect("stages").id, trailing.id);

    // History recorded the forced hop.
    let moved = api::deals::load_stage_deals(ctx.engine.db(), target.id)
        .await
        .expect("load")
        .into_iter()
        .find(|d| d.title == "d1")
        .expect("d1");
    assert_eq!(moved.last_stage_id, Some(doomed.id));
    let history = ctx.engine.deal_history(moved.id, 10, 0).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_stage, Some(doomed.id));
}

#[tokio::test]
async fn deleting_a_stage_with_locked_deals_is_refused() {
    let ctx = setup().await;
    let lead = make_stage(&ctx.engine, "Lead", 10, false, false).await;
    let won = make_stage(&ctx.engine, "Won", 100, true, false).await;
    let keep = make_stage(&ctx.engine, "Keep", 20, false, false).await;
    let d1 = make_deal(&ctx.engine, lead.id, "d1", 1_000).await;
    ctx.engine
        .move_deal(MoveDeal {
            deal_id: d1.id,
            target_stage_id: won.id,
            target_index: 0,
            actor: None,
            note: None,
        })
        .await
        .expect("close");

    let err = ctx
        .engine
        .delete_stage(won.id, Some(keep.id), None)
        .await
        .expect_err("reassigned a locked deal");
    assert!(matches!(err, PipelineError::DealLocked));
}

#[tokio::test]
async fn deleting_into_a_terminal_stage_applies_its_side_effects() {
    let ctx = setup().await;
    let doomed = make_stage(&ctx.engine, "Doomed", 10, false, false).await;
    let won = make_stage(&ctx.engine, "Won", 100, true, false).await;
    let d1 = make_deal(&ctx.engine, doomed.id, "d1", 1_000).await;

    ctx.engine
        .delete_stage(doomed.id, Some(won.id), None)
        .await
        .expect("delete");

    let closed = common::reload_deal(&ctx.engine, d1.id).await;
    assert_eq!(closed.status, entity::deal::Status::Won);
    assert!(closed.is_locked);
    assert!(closed.actual_close_date.is_some());
}

#[tokio::test]
async fn deleting_an_empty_stage_needs_no_target() {
    let ctx = setup().await;
    let a = make_stage(&ctx.engine, "A", 10, false, false).await;
    let b = make_stage(&ctx.engine, "B", 20, false, false).await;

    ctx.engine.delete_stage(a.id, None, None).await.expect("delete");
    let stages = load_stages(ctx.engine.db()).await.expect("load");
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].id, b.id);
    assert_eq!(stages[0].sort_order, 0);
}
