pub mod app;
pub mod auth;
pub mod chunker;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod heartbeat;
pub mod request;
pub mod sse;
pub mod upstream;
