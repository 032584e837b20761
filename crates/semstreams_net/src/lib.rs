//! # semstreams_net
//!
//! NATS transport layer for the semantic streaming core.
//!
//! This crate provides:
//!
//! - [`subjects`] — bus subject constants and builders.
//! - [`messages`] — the message envelope and dead-letter record.
//! - [`api`] — request/reply types for the query surface.
//! - [`codec`] — JSON serialisation/deserialisation helpers.
//! - [`connection`] — NATS connection management.
//! - [`error`] — network-layer error types.

pub mod api;
pub mod codec;
pub mod connection;
pub mod error;
pub mod messages;
pub mod subjects;

pub use codec::{decode, encode};
pub use connection::NatsConnection;
pub use error::NetError;
pub use messages::Envelope;
