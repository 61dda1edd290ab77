//! Matrix adapter: client session, room handle, and event bridging.

pub mod client;
pub mod handler;
pub mod room;

pub use client::connect;
pub use room::MatrixRoom;
