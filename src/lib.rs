//! Server-side WebSockets connection engine for the Tokio stack.
//!
//! This library takes care of the hard part of running a WebSocket endpoint:
//! once a TCP connection is upgraded, a per-connection engine interprets the
//! inbound frame stream following the standards of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455),
//! reassembling fragmented messages, enforcing masking, RSV and UTF-8 rules,
//! answering pings, pinging idle peers, and driving a compliant closing
//! handshake with proper status codes.
//!
//! Applications plug in by implementing the [`service::Service`] trait and
//! either calling [`server::start_server`] for a batteries-included TCP
//! server, [`handshake::accept_async`] to upgrade streams they accepted
//! themselves, or [`connection::attach`] to wire up a stream something
//! upstream already upgraded.

pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod request;
pub mod server;
pub mod service;

mod read;
mod utils;
mod write;
