mod auth;
mod extract;
mod health;
mod users;

pub use auth::{login, logout_all, refresh, register};
pub use extract::JsonBody;
pub use health::{health_check, readiness_check};
pub use users::{get_user, me, set_permissions};
