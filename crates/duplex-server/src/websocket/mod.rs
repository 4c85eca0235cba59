//! WebSocket sessions, the connection table, and frames.

pub mod connection;
pub mod frame;
pub mod session;
pub mod table;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use frame::Frame;
pub use table::{Connections, PushError};
