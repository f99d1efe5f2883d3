//! Location intelligence for geofuse.
//!
//! Resolves ambiguous, multilingual place names against curated data and
//! external geocoders, fuses the answers into one coordinate and places guide
//! chapters inside a site at the best available precision.

pub mod ambiguity;
pub mod cache;
pub mod consensus;
pub mod dataset;
pub mod package;
pub mod poi;
pub mod providers;
pub mod quality;
pub mod resilient;
pub mod resolver;
pub mod tiers;
pub mod types;

pub use ambiguity::{AmbiguityOutcome, AmbiguityResolver};
pub use consensus::{build_consensus, ConsensusError, ConsensusResult};
pub use dataset::{DatasetError, Datasets, Site};
pub use package::LocationPackage;
pub use poi::{PoiMatcher, SubLocationMatch};
pub use quality::{QualityManager, QualityReport};
pub use resolver::LocationResolver;
pub use tiers::{PrecisionTier, TierRouter};
pub use types::{
    LocationError, LocationQuery, ProviderError, QueryContext, ResolutionMethod, ResolvedLocation,
};
