use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use tollgate_db::Database;

/// Background task that prunes expired sessions and one-time tokens.
pub async fn run_cleanup_loop(db: Arc<Database>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let db = db.clone();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<(usize, usize)> {
            let now = Utc::now();
            Ok((db.delete_expired_sessions(now)?, db.delete_expired_tokens(now)?))
        })
        .await;

        match result {
            Ok(Ok((sessions, tokens))) => {
                if sessions + tokens > 0 {
                    info!("Cleanup: pruned {} sessions, {} one-time tokens", sessions, tokens);
                }
            }
            Ok(Err(e)) => warn!("Cleanup error: {}", e),
            Err(e) => warn!("Cleanup task failed: {}", e),
        }
    }
}
