//! API Layer
//!
//! HTTP handlers, routing, and request middleware.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::{AppState, SuccessResponse};
pub use middleware::{auth_middleware, AuthUser};
pub use routes::create_routes;
