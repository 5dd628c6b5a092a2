//! Connection registry and room membership

mod registry;
mod rooms;
mod types;

pub use registry::Registry;
pub use rooms::{is_valid_room_name, JoinOutcome, RoomInfo, RoomTable};
pub use types::{ConnectionHandle, ConnectionId, ConnectionState};
