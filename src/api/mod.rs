pub mod channel;
pub mod routes;
pub mod signaling;
pub mod websocket;

pub use routes::routes;
pub use signaling::{ProctorMessage, SessionSignalingHandler, TrackDescriptor};
