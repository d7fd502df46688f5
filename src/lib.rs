//! A gateway that carries remote desktop connections over HTTPS.
//!
//! Clients reach the gateway with two long-lived HTTP requests per connection. The [`http`]
//! front-end turns each of them into a [`GatewayRequest`] for the [`Gateway`], which runs the
//! protocol described in [`tsgate_proto`], connects to a backend and relays between the two.

pub mod config;
mod error;
pub mod gateway;
pub mod http;
mod identity;
pub mod utils;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayRequest};
pub use identity::ClientIdentity;
