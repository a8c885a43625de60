//! Authentication Module
//! Bearer JWT authentication for player-facing routes.

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::Claims;
