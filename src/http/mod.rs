//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the control surface and playlist endpoints
//! - REST handlers for run control, delay, and fragment configuration
//! - The realtime WebSocket channel for admins, subtitlers, spectators
//! - CORS and request tracing middleware

pub mod handlers;
pub mod routes;
pub mod ws;

pub use routes::create_router;
