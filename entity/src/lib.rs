pub mod deal;
pub mod deal_stage_history;
pub mod stage;
