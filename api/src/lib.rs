//! Pipeline engine: ordered stages, ranked deals, atomic moves, derived
//! board metrics and a change feed for view convergence.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub mod deals;
pub mod error;
pub mod feed;
pub mod locks;
pub mod metrics;
pub mod moves;
pub mod ordering;
pub mod schema;
pub mod seed;
pub mod stages;
pub mod view;

pub use error::{PipelineError, PipelineResult};

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Staleness threshold for stages without a `rotten_days` override.
    pub rotten_days_default: i64,
    /// Broadcast buffer per change-feed subscriber.
    pub feed_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rotten_days_default: metrics::DEFAULT_ROTTEN_DAYS,
            feed_capacity: feed::FEED_CAPACITY,
        }
    }
}

/// The store-facing engine. One instance per process; shared behind `Arc`.
pub struct PipelineEngine {
    db: Arc<DatabaseConnection>,
    locks: locks::PartitionLocks,
    feed: feed::ChangeFeed,
    config: EngineConfig,
}

impl PipelineEngine {
    pub fn new(db: Arc<DatabaseConnection>, config: EngineConfig) -> Self {
        Self {
            db,
            locks: locks::PartitionLocks::default(),
            feed: feed::ChangeFeed::new(config.feed_capacity),
            config,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    pub fn feed(&self) -> &feed::ChangeFeed {
        &self.feed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &locks::PartitionLocks {
        &self.locks
    }
}
