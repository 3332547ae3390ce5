//! WebSocket protocol: message types and the connection handler.

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
