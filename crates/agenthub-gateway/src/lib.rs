//! WebSocket and HTTP surface of the agenthub orchestration hub.
//!
//! - [`GatewayServer`] builds the axum router: `/ws/agent`, `/ws/web`,
//!   `/health` and `/api/agents`.
//! - [`DispatchTable`] maps each inbound event name to its handler, one table
//!   per transport kind.
//! - [`protocol`] holds the typed payload of every inbound event.

pub mod handlers;
pub mod protocol;
pub mod server;

pub use handlers::{DispatchTable, EventContext, HandlerFn};
pub use server::GatewayServer;
