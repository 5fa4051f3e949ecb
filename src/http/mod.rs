//! Web facade: REST read access to the event store, pipeline status, audio
//! playback, and the live WebSocket console.
//!
//! - GET /: dashboard
//! - GET /api/events: query events
//! - GET /api/events/active: in-progress events
//! - GET /api/status: supervisor status
//! - GET /api/audio/:filename: recorded audio
//! - DELETE /api/events: clear everything
//! - WS /ws/console: live decoded message stream

mod handlers;
mod routes;
mod state;
pub mod ws;

pub use routes::create_router;
pub use state::AppState;
