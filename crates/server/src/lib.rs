// inkwell-server library: lease-based lock manager, version store, document
// sessions and the HTTP/WebSocket surface around them.

pub mod api;
pub mod auth;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod history;
pub mod lock;
pub mod server;
pub mod session;
pub mod store;
pub mod ws;
