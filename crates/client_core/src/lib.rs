//! Client side of the stranger-chat pairing protocol.
//!
//! [`session::Session`] holds the lifecycle state and its transitions;
//! [`runtime::SessionRuntime`] runs it against a live WebSocket.

use shared::domain::SessionSnapshot;

pub mod runtime;
pub mod session;
pub mod transport;

pub use runtime::{RuntimeConfig, SessionHandle, SessionRuntime};
pub use session::{Effect, Session, SessionInput, TransportEvent, UserCommand};
pub use transport::{websocket_url, TransportError, CLOSE_ACK_TIMEOUT};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Published after every handled input.
    Updated(SessionSnapshot),
    Error(String),
}
