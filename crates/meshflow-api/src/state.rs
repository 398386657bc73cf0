use std::sync::Arc;

use meshflow_db::Database;
use meshflow_ingest::IngestService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub ingest: IngestService,
    pub jwt_secret: String,
}
