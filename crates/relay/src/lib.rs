// socialnet-relay library entry point: real-time fan-out of chat messages and
// notifications to WebSocket subscribers.

pub mod auth;
pub mod bridge;
pub mod chat;
pub mod config;
pub mod connection;
pub mod db;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod membership;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;
pub mod store;
pub mod ws;
