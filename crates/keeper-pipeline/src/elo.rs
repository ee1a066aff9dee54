//! Elo rating updates for bucket tournaments.

/// Base step size before confidence weighting.
pub const K_BASE: f64 = 32.0;

/// Logistic scale.
const SCALE: f64 = 400.0;

/// Expected score of a player rated `ra` against one rated `rb`.
pub fn expected_score(ra: f64, rb: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rb - ra) / SCALE))
}

/// Rating deltas for one match. `winner_is_first` says whether the first
/// player won; `confidence` in [0, 1] scales the step (`K = K_BASE · c`).
/// Returns `(delta_first, delta_second)`.
pub fn rating_deltas(ra: f64, rb: f64, winner_is_first: bool, confidence: f64) -> (f64, f64) {
    let k = K_BASE * confidence.clamp(0.0, 1.0);
    let expected_a = expected_score(ra, rb);
    let expected_b = expected_score(rb, ra);
    let (score_a, score_b) = if winner_is_first { (1.0, 0.0) } else { (0.0, 1.0) };

    (k * (score_a - expected_a), k * (score_b - expected_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_scores_sum_to_one() {
        for (ra, rb) in [(1000.0, 1000.0), (1200.0, 900.0), (850.0, 1410.0)] {
            let sum = expected_score(ra, rb) + expected_score(rb, ra);
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_equal_ratings_full_confidence() {
        let (da, db) = rating_deltas(1000.0, 1000.0, true, 1.0);
        assert!((da - 16.0).abs() < 1e-12);
        assert!((db + 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_deltas_are_zero_sum() {
        let (da, db) = rating_deltas(1040.0, 972.0, false, 0.7);
        assert!((da + db).abs() < 1e-12);
        assert!(db > 0.0);
        assert!(da < 0.0);
    }

    #[test]
    fn test_upset_moves_more_points() {
        // Lower-rated player winning gains more than the favorite would.
        let (underdog_gain, _) = rating_deltas(900.0, 1100.0, true, 1.0);
        let (favorite_gain, _) = rating_deltas(1100.0, 900.0, true, 1.0);
        assert!(underdog_gain > favorite_gain);
    }

    #[test]
    fn test_zero_confidence_freezes_ratings() {
        let (da, db) = rating_deltas(1000.0, 1000.0, true, 0.0);
        assert_eq!(da, 0.0);
        assert_eq!(db, 0.0);
    }

    #[test]
    fn test_confidence_clamped() {
        let (strong, _) = rating_deltas(1000.0, 1000.0, true, 5.0);
        assert!((strong - 16.0).abs() < 1e-12);
    }
}
