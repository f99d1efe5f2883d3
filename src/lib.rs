//! geofuse: multi-source place resolution with ambiguity scoring, coordinate
//! consensus and tiered sub-location fallback.

pub mod config;
pub mod geo;
pub mod location;
pub mod server;
