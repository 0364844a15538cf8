//! Candidate selection and pairing
//!
//! Pure rules (compatibility, ranking) plus the engine that commits pairings
//! against the shared store and the collaborators.

pub mod compatibility;
pub mod engine;
pub mod ranking;

pub use compatibility::compatible;
pub use engine::{MatchSettings, PairingEngine};
pub use ranking::{rank_candidates, RankedCandidate, RankingPolicy};
