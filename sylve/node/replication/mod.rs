/// Protocol client
pub mod client;
/// Wire message types
pub mod message;
/// Protocol server
pub mod server;
