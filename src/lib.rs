//! Property-listing dashboard served over the Postgres wire protocol.
//!
//! A [`session::Session`] holds one immutable snapshot of listings, cities
//! and amenities; every query is one pass of the [`engine`] over it.

mod auth;
pub mod config;
pub mod engine;
pub mod geo;
pub mod limits;
pub mod model;
pub mod observability;
pub mod session;
pub mod source;
pub mod sql;
pub mod wire;
