//! Real-time hub between parking sensors, the entrance barrier and any number
//! of live observers.
//!
//! Devices hold a WebSocket open to the hub and exchange the JSON messages in
//! [`message`]. Each module owns one responsibility:
//!
//! - [`registry`] tracks live connections and fans frames out to them,
//!   dropping any peer whose send fails.
//! - [`broadcast`] encodes outbound messages and hands them to the registry.
//! - [`authority`] is the only writer of spot status. It persists through a
//!   [`store::SpotStore`], records the audit trail and announces the change.
//! - [`barrier`] runs the gate's open/auto-close state machine.
//! - [`hub`] wires the above together and routes inbound device messages.
//! - [`server`] exposes the hub over axum: `/ws` for devices plus REST routes.
//! - [`cli`] and [`config`] cover the binary's settings.

pub mod authority;
pub mod barrier;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod server;
pub mod spot;
pub mod store;
