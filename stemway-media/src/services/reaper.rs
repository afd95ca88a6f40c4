//! TTL eviction sweep
//!
//! Session and job state is process-local; instead of relying on process
//! lifetime, a background task periodically drops idle sessions and terminal
//! jobs older than the configured TTL and purges their on-disk residue.

use crate::AppState;
use tokio::task::JoinHandle;

/// Spawn the eviction sweep loop
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: AppState) {
    let ttl = state.config.session_ttl_secs;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        state.config.sweep_interval_secs.max(1),
    ));
    // First tick fires immediately; skip it so a fresh start does nothing
    interval.tick().await;

    loop {
        interval.tick().await;
        let sessions = state.uploads.evict_stale(ttl).await;
        let jobs = state.exports.evict_stale(ttl).await;
        if sessions > 0 || jobs > 0 {
            tracing::info!(sessions, jobs, "Eviction sweep removed stale entries");
        }
    }
}
