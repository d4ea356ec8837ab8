use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::Config;
use crate::websocket::presence_registry::PresenceRegistry;
use crate::websocket::signal_registry::SignalRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub presence: Arc<PresenceRegistry>,
    pub signal: Arc<SignalRegistry>,
    /// Process start time, for the internal snapshot's `uptime` field
    /// (spec §4.4: "internal snapshot ... totals, uptime, ...").
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        AppState {
            db,
            config: Arc::new(config),
            presence: Arc::new(PresenceRegistry::new()),
            signal: Arc::new(SignalRegistry::new()),
            started_at: Utc::now(),
        }
    }
}
