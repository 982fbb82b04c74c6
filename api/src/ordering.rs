//! Ordered-collection primitive.
//!
//! Both ordered lists in the system (the global stage list and each stage's
//! deal list) keep a dense, gapless `sort_order` of `0..n-1`. Moving an item
//! shifts only the rows between its old and new position; nothing ever
//! renumbers a whole partition.
//!
//! Soft-deleted deals sit outside their partition: they are excluded from
//! counts and from every shift.

use entity::{deal, stage};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};

use crate::error::PipelineResult;
use crate::locks::Partition;

/// Number of live items in a partition.
pub async fn len<C: ConnectionTrait>(conn: &C, partition: Partition) -> PipelineResult<i32> {
    let count = match partition {
        Partition::Stages => stage::Entity::find().count(conn).await?,
        Partition::Deals(stage_id) => {
            deal::Entity::find()
                .filter(deal::Column::StageId.eq(stage_id))
                .filter(deal::Column::IsDeleted.eq(false))
                .count(conn)
                .await?
        }
    };
    Ok(count as i32)
}

/// Clamp a requested insertion index to `[0, len]`.
pub fn clamp_index(requested: i32, len: i32) -> i32 {
    requested.clamp(0, len.max(0))
}

/// The half-open rank range affected by a same-partition reinsertion, and
/// the direction it shifts. `None` when old and new coincide.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeShift {
    pub lo: i32,
    pub hi: i32,
    pub delta: i32,
}

pub fn reinsert_shift(old_index: i32, new_index: i32) -> Option<RangeShift> {
    match new_index.cmp(&old_index) {
        std::cmp::Ordering::Equal => None,
        // Moving down: everything between (old, new] steps back one slot.
        std::cmp::Ordering::Greater => Some(RangeShift {
            lo: old_index + 1,
            hi: new_index,
            delta: -1,
        }),
        // Moving up: everything between [new, old) steps forward one slot.
        std::cmp::Ordering::Less => Some(RangeShift {
            lo: new_index,
            hi: old_index - 1,
            delta: 1,
        }),
    }
}

/// Make room at `at_index`: every live row at or after it steps forward.
pub async fn open_gap<C: ConnectionTrait>(
    conn: &C,
    partition: Partition,
    at_index: i32,
) -> PipelineResult<()> {
    shift(conn, partition, at_index, i32::MAX, 1).await
}

/// Close the hole left at `removed_index`: every live row after it steps back.
pub async fn close_gap<C: ConnectionTrait>(
    conn: &C,
    partition: Partition,
    removed_index: i32,
) -> PipelineResult<()> {
    shift(conn, partition, removed_index + 1, i32::MAX, -1).await
}

/// Shift the live rows with `lo <= sort_order <= hi` by `delta`.
pub async fn shift<C: ConnectionTrait>(
    conn: &C,
    partition: Partition,
    lo: i32,
    hi: i32,
    delta: i32,
) -> PipelineResult<()> {
    if lo > hi {
        return Ok(());
    }
    match partition {
        Partition::Stages => {
            stage::Entity::update_many()
                .col_expr(
                    stage::Column::SortOrder,
                    Expr::col(stage::Column::SortOrder).add(delta),
                )
                .filter(stage::Column::SortOrder.gte(lo))
                .filter(stage::Column::SortOrder.lte(hi))
                .exec(conn)
                .await?;
        }
        Partition::Deals(stage_id) => {
            deal::Entity::update_many()
                .col_expr(
                    deal::Column::SortOrder,
                    Expr::col(deal::Column::SortOrder).add(delta),
                )
                .filter(deal::Column::StageId.eq(stage_id))
                .filter(deal::Column::IsDeleted.eq(false))
                .filter(deal::Column::SortOrder.gte(lo))
                .filter(deal::Column::SortOrder.lte(hi))
                .exec(conn)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_bounds() {
        assert_eq!(clamp_index(-3, 4), 0);
        assert_eq!(clamp_index(0, 4), 0);
        assert_eq!(clamp_index(4, 4), 4);
        assert_eq!(clamp_index(99, 4), 4);
        assert_eq!(clamp_index(1, 0), 0);
    }

    #[test]
    fn reinsert_down_shifts_between_back() {
        let shift = reinsert_shift(1, 3).expect("shift");
        assert_eq!(shift, RangeShift { lo: 2, hi: 3, delta: -1 });
    }

    #[test]
    fn reinsert_up_shifts_between_forward() {
        let shift = reinsert_shift(3, 0).expect("shift");
        assert_eq!(shift, RangeShift { lo: 0, hi: 2, delta: 1 });
    }

    #[test]
    fn reinsert_in_place_is_no_shift() {
        assert_eq!(reinsert_shift(2, 2), None);
    }
}
