//! Candidate scoring and ranking.
//!
//! `score = distance_km * w_distance * surge - rating * w_rating
//!        - fairness * w_fairness`, lower is better. Surge inflates the
//! distance term so hot zones prefer strictly closer captains; fairness
//! rewards captains who have waited longest since their last assignment.

use std::collections::HashMap;

use common::geo::GeoPoint;

use crate::captains::model::Captain;
use crate::jobs::model::CaptainId;

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub distance: f64,
    pub rating: f64,
    pub fairness: f64,
}

/// Sentinel for candidates with no known location; keeps them rankable
/// but last.
const UNKNOWN_DISTANCE_KM: f64 = 999.0;

pub fn dispatch_score(
    captain: &Captain,
    pickup: &GeoPoint,
    surge_multiplier: f64,
    weights: &ScoreWeights,
    now_ms: i64,
) -> f64 {
    let distance_km = captain
        .location
        .map(|loc| loc.distance_km(pickup))
        .unwrap_or(UNKNOWN_DISTANCE_KM);

    let fairness = (captain.idle_minutes(now_ms) / 60.0).min(1.0);

    distance_km * weights.distance * surge_multiplier
        - captain.average_rating * weights.rating
        - fairness * weights.fairness
}

/// Sorts candidates best-first by dispatch score.
pub fn rank_captains(
    mut captains: Vec<Captain>,
    pickup: &GeoPoint,
    surge_multiplier: f64,
    weights: &ScoreWeights,
    now_ms: i64,
) -> Vec<Captain> {
    let mut scored: Vec<(f64, Captain)> = captains
        .drain(..)
        .map(|c| {
            let s = dispatch_score(&c, pickup, surge_multiplier, weights, now_ms);
            (s, c)
        })
        .collect();

    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

/// Re-sorts by known driving ETA, ascending; candidates without an ETA
/// keep their scored order after the known ones.
pub fn rerank_by_eta(
    ranked: Vec<Captain>,
    eta_map: &HashMap<CaptainId, i64>,
) -> Vec<Captain> {
    if eta_map.is_empty() {
        return ranked;
    }

    let mut known: Vec<(i64, Captain)> = Vec::new();
    let mut unknown: Vec<Captain> = Vec::new();

    for captain in ranked {
        match eta_map.get(&captain.user_id) {
            Some(eta) => known.push((*eta, captain)),
            None => unknown.push(captain),
        }
    }

    known.sort_by_key(|(eta, _)| *eta);
    known
        .into_iter()
        .map(|(_, c)| c)
        .chain(unknown)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn weights() -> ScoreWeights {
        ScoreWeights {
            distance: 1.0,
            rating: 0.4,
            fairness: 0.2,
        }
    }

    fn mk_captain(lat: f64, lng: f64, rating: f64) -> Captain {
        let mut c = Captain::new(Uuid::new_v4(), 0);
        c.location = Some(GeoPoint::new(lat, lng));
        c.average_rating = rating;
        c.is_online = true;
        c.is_verified = true;
        c
    }

    /// Offsets in degrees latitude: 0.009 ~= 1 km.
    fn at_km(pickup: &GeoPoint, km: f64, rating: f64) -> Captain {
        mk_captain(pickup.lat + km / 111.0, pickup.lng, rating)
    }

    #[test]
    fn closer_wins_at_equal_rating() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let near = at_km(&pickup, 0.4, 4.8);
        let far = at_km(&pickup, 1.2, 4.8);

        let ranked = rank_captains(
            vec![far.clone(), near.clone()],
            &pickup,
            1.0,
            &weights(),
            0,
        );
        assert_eq!(ranked[0].user_id, near.user_id);
        assert_eq!(ranked[1].user_id, far.user_id);
    }

    #[test]
    fn distance_dominates_with_default_weights() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let c1 = at_km(&pickup, 0.4, 4.8);
        let c2 = at_km(&pickup, 0.6, 4.6);
        let c3 = at_km(&pickup, 1.2, 4.9);

        let ranked = rank_captains(
            vec![c3.clone(), c2.clone(), c1.clone()],
            &pickup,
            1.0,
            &weights(),
            0,
        );
        let ids: Vec<_> = ranked.iter().map(|c| c.user_id).collect();
        assert_eq!(ids, vec![c1.user_id, c2.user_id, c3.user_id]);
    }

    #[test]
    fn rating_breaks_distance_ties() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let better = at_km(&pickup, 0.6, 4.9);
        let worse = at_km(&pickup, 0.6, 4.2);

        let ranked = rank_captains(
            vec![worse.clone(), better.clone()],
            &pickup,
            1.0,
            &weights(),
            0,
        );
        assert_eq!(ranked[0].user_id, better.user_id);
    }

    #[test]
    fn surge_amplifies_distance_penalty() {
        let pickup = GeoPoint::new(12.97, 77.59);
        // Far captain with a perfect rating beats a mediocre near one at
        // surge 1.0, but not when surge stretches the distance term.
        let near = at_km(&pickup, 0.2, 3.0);
        let far = at_km(&pickup, 1.0, 5.0);

        let w = weights();
        let near_base = dispatch_score(&near, &pickup, 1.0, &w, 0);
        let far_base = dispatch_score(&far, &pickup, 1.0, &w, 0);
        assert!(far_base < near_base);

        let near_surged = dispatch_score(&near, &pickup, 3.0, &w, 0);
        let far_surged = dispatch_score(&far, &pickup, 3.0, &w, 0);
        assert!(near_surged < far_surged);
    }

    #[test]
    fn idle_captains_rank_ahead_of_recently_served() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let mut fresh = at_km(&pickup, 0.5, 4.5);
        let mut idle = at_km(&pickup, 0.5, 4.5);
        let now = 2 * 60 * 60 * 1_000;
        fresh.last_assigned_at_ms = Some(now); // just served
        idle.last_assigned_at_ms = Some(0); // two hours idle

        let w = weights();
        assert!(
            dispatch_score(&idle, &pickup, 1.0, &w, now)
                < dispatch_score(&fresh, &pickup, 1.0, &w, now)
        );
    }

    #[test]
    fn fairness_saturates_at_one_hour() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let mut hour = at_km(&pickup, 0.5, 4.5);
        let mut day = at_km(&pickup, 0.5, 4.5);
        let now = 24 * 60 * 60 * 1_000;
        hour.last_assigned_at_ms = Some(now - 60 * 60 * 1_000);
        day.last_assigned_at_ms = Some(0);

        let w = weights();
        let a = dispatch_score(&hour, &pickup, 1.0, &w, now);
        let b = dispatch_score(&day, &pickup, 1.0, &w, now);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn missing_location_ranks_last() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let located = at_km(&pickup, 4.0, 2.0);
        let mut lost = mk_captain(0.0, 0.0, 5.0);
        lost.location = None;

        let ranked = rank_captains(
            vec![lost.clone(), located.clone()],
            &pickup,
            1.0,
            &weights(),
            0,
        );
        assert_eq!(ranked[0].user_id, located.user_id);
    }

    #[test]
    fn eta_rerank_puts_known_first_ascending() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let a = at_km(&pickup, 0.2, 4.5);
        let b = at_km(&pickup, 0.5, 4.5);
        let c = at_km(&pickup, 0.9, 4.5);

        let mut etas = HashMap::new();
        etas.insert(b.user_id, 120_i64);
        etas.insert(c.user_id, 60_i64);
        // `a` has no ETA and must drop behind the known ones.

        let reranked = rerank_by_eta(vec![a.clone(), b.clone(), c.clone()], &etas);
        let ids: Vec<_> = reranked.iter().map(|x| x.user_id).collect();
        assert_eq!(ids, vec![c.user_id, b.user_id, a.user_id]);
    }

    #[test]
    fn empty_eta_map_keeps_scored_order() {
        let pickup = GeoPoint::new(12.97, 77.59);
        let a = at_km(&pickup, 0.2, 4.5);
        let b = at_km(&pickup, 0.5, 4.5);
        let order: Vec<_> = vec![a.clone(), b.clone()]
            .iter()
            .map(|c| c.user_id)
            .collect();

        let reranked = rerank_by_eta(vec![a, b], &HashMap::new());
        let ids: Vec<_> = reranked.iter().map(|x| x.user_id).collect();
        assert_eq!(ids, order);
    }
}
