//! API layer - HTTP endpoint handlers.

mod health;
mod rooms;
mod routes;

pub use health::{health, root, stats};
pub use rooms::{get_room, list_rooms};
pub use routes::api_routes;
