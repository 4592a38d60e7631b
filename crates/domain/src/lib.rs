//! skymirror domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `feed`: Raw source-network feed entries
//! - `model`: Domain entities and value objects
//! - `cache`: The fingerprint cache of mirrored posts
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `policy`: Per-destination eligibility rules
//! - `usecases`: Normalization, rendering, publishing and the run loop

pub mod cache;
pub mod feed;
pub mod model;
pub mod policy;
pub mod ports;
pub mod usecases;

pub use cache::*;
pub use model::*;
pub use ports::*;
