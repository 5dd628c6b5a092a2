mod dispatcher;
mod handler;
mod message;

pub use dispatcher::{dispatch, reject_binary, teardown};
pub use handler::ws_handler;
pub use message::{ClientMessage, InboundFrame, OutboundMessage, ServerMessage, SERVER_SENDER};
