//! Testdeck Web
//!
//! HTTP control surface for the harness: run control, history, reports and
//! the live WebSocket push channel.

pub mod live;
pub mod server;

pub use server::{serve, AppState, WebServer};
