//! Mnemograph server — transports and process wiring

pub mod http;
pub mod state;
pub mod stdio;

pub use http::run_http;
pub use state::ServerState;
pub use stdio::run_stdio;
