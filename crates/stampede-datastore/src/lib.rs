//! The orchestration-and-bookkeeping engine: lifecycle management, work and
//! event distribution, and the result/metric store, all expressed over the
//! [`Commands`] capability.

use std::sync::Arc;
use std::time::Duration;

use stampede_store::Commands;

mod events;
mod keys;
mod lifecycle;
mod metrics;
mod results;
mod work;

/// Event kind announcing freshly added user ids to a manager.
pub const START_USERS_KIND: &str = "START_USERS";

/// Event kind carrying the user ids a manager must drain.
pub const STOP_USERS_KIND: &str = "STOP_USERS";

/// Tests, scenarios, scenario results, and last-metric values all expire an
/// hour after they are written.
pub(crate) const RECORD_TTL: Duration = Duration::from_secs(60 * 60);

/// Stateless engine over the backing store. All state lives behind
/// [`Commands`]; concurrent scenario-scoped writes are the caller's to
/// serialize.
pub struct Datastore {
    commands: Arc<dyn Commands>,
}

impl Datastore {
    pub fn new(commands: Arc<dyn Commands>) -> Self {
        Self { commands }
    }
}
