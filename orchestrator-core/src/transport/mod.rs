pub mod direct;
pub mod socket;
pub mod websocket;
