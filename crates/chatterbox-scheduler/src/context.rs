//! Shared handles every trigger and action kind is built from.

use chatterbox_channels::ChannelRegistry;

use crate::interval::{ActiveJobs, IntervalScheduler};
use crate::persistence::Database;

/// Everything a task kind needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct TaskContext {
    pub db: Database,
    pub scheduler: IntervalScheduler,
    pub active: ActiveJobs,
    pub channels: ChannelRegistry,
}

impl TaskContext {
    pub fn new(db: Database, channels: ChannelRegistry) -> Self {
        Self {
            db,
            scheduler: IntervalScheduler::new(),
            active: ActiveJobs::default(),
            channels,
        }
    }
}
