pub mod routes;

pub use routes::{create_router, ApiError, ApiSettings, AppState, TASK_TOKEN_HEADER};
