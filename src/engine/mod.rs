//! Filter-and-aggregate engine.
//!
//! Everything here is a pure function over an immutable [`Snapshot`]: no
//! I/O, no shared state, no caching. Dangling foreign keys are "no match"
//! states, never errors; the only failure is an invalid filter range.
//!
//! [`Snapshot`]: crate::model::Snapshot

mod aggregate;
mod dashboard;
mod error;
mod filter;

pub use aggregate::{
    aggregate_by_city, city_map, city_overview, price_by_city, price_histogram, surface_vs_price,
};
pub use dashboard::{recompute, Dashboard};
pub use error::EngineError;
pub use filter::{apply_filter, filter_options, listings_with_any_amenity, resolve_city, validate};
