//! Axum WebSocket server adapter.
//!
//! One route (`GET /ws`), one coordinator per connection. The upgrade
//! handler wires three tasks per session: a reader (client frames into the
//! coordinator inbox), the coordinator itself, and a writer (outbound events
//! to the socket, minting `seq`). `bootstrap` is the composition root that
//! picks the identity verifier and the upstream/recognizer factories from
//! configuration and runs the server with a graceful SIGINT/SIGTERM drain.

pub mod bootstrap;
pub mod handlers;
pub mod routes;
pub mod state;

pub use bootstrap::{build_state, start_server};
pub use state::AppState;
