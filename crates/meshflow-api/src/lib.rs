pub mod claims;
pub mod ingest;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::api_routes;
pub use state::{AppState, AppStateInner};
