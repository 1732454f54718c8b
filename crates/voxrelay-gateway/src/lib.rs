//! WebSocket voice relay.
//!
//! Each connection is a session: inbound binary frames are audio chunks, and
//! every chunk runs one transcribe -> generate -> synthesize turn whose
//! results are streamed back on the same socket.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod state;

pub use connection::{SessionHandle, SessionState};
pub use pipeline::{Inbound, Outbound, Pipeline, SessionEnd, TurnOutcome, TurnSink};
pub use server::{router, start_gateway};
pub use state::{Engines, GatewayState};
