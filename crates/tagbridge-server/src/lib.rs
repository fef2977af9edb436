//! # tagbridge-server
//!
//! WebSocket bridge between a PC/SC NFC reader (ACR122U) and local web
//! clients.
//!
//! - [`reader`] - PC/SC card transport and the reader monitor
//! - [`api`] - WebSocket channel, health, status and OpenAPI routes
//! - [`state`] - state shared across handlers
//! - [`logging`] - tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod reader;
pub mod state;
