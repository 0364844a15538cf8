//! Candidate ordering for a single match attempt

use crate::geo;
use crate::types::{Coordinates, SearchRecord};
use std::cmp::Ordering;

/// A pool member considered as a partner, with its distance to the requester
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub record: SearchRecord,
    /// `None` when either side has no usable location
    pub distance_km: Option<f64>,
}

/// How candidates are ordered and filtered
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RankingPolicy {
    /// Pool order, no distance requirement
    PoolOrder,
    /// Ascending distance, candidates beyond the cutoff dropped
    Proximity { max_distance_km: f64 },
}

/// Order `candidates` for `origin` according to `policy`.
///
/// Under `Proximity` the sort is stable, so equal distances keep pool order,
/// and candidates without a location sort after every located one. Only
/// candidates within `max_distance_km` survive; an unlocated candidate has
/// no finite distance and therefore never does.
pub fn rank_candidates(
    origin: Option<Coordinates>,
    candidates: Vec<SearchRecord>,
    policy: RankingPolicy,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|record| {
            let distance_km = geo::distance_between(origin, record.coordinates());
            RankedCandidate {
                record,
                distance_km,
            }
        })
        .collect();

    match policy {
        RankingPolicy::PoolOrder => ranked,
        RankingPolicy::Proximity { max_distance_km } => {
            sort_by_distance(&mut ranked);
            ranked.retain(|c| c.distance_km.is_some_and(|d| d <= max_distance_km));
            ranked
        }
    }
}

/// Stable ascending sort by distance with unlocated candidates last
pub fn sort_by_distance(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| {
        a.distance_km
            .unwrap_or(f64::MAX)
            .partial_cmp(&b.distance_km.unwrap_or(f64::MAX))
            .unwrap_or(Ordering::Equal)
    });
}
