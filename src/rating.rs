//! Rating Engine: pure Elo, no I/O.

/// Default starting rating for a new account.
pub const DEFAULT_RATING: i32 = 1200;
/// Default K-factor.
pub const DEFAULT_K_FACTOR: i32 = 32;

/// `E_a = 1 / (1 + 10^((Rb - Ra) / 400))`
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// New rating for a player with `rating`, facing an opponent with
/// `opponent_rating`, given actual score `score` (`1.0` win, `0.5` draw,
/// `0.0` loss) and K-factor `k`.
pub fn new_rating(rating: i32, opponent_rating: i32, score: f64, k: i32) -> i32 {
    let expected = expected_score(rating, opponent_rating);
    (rating as f64 + k as f64 * (score - expected)).round() as i32
}

/// Compute both players' post-match ratings in one call.
pub fn apply_result(red_rating: i32, black_rating: i32, red_score: f64, k: i32) -> (i32, i32) {
    let black_score = 1.0 - red_score;
    (
        new_rating(red_rating, black_rating, red_score, k),
        new_rating(black_rating, red_rating, black_score, k),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_expect_even_odds() {
        let e = expected_score(1200, 1200);
        assert!((e - 0.5).abs() < 1e-9);
    }

    #[test]
    fn higher_rated_player_has_greater_expectation() {
        assert!(expected_score(1600, 1200) > expected_score(1200, 1600));
    }

    #[test]
    fn worked_example_matches_hand_calculation() {
        // Ra=1200, Rb=1400, Ra wins, K=32.
        // E_a = 1 / (1 + 10^(200/400)) ~= 0.2402530733
        // new_Ra = round(1200 + 32*(1 - 0.2403)) ~= 1224
        let updated = new_rating(1200, 1400, 1.0, 32);
        assert_eq!(updated, 1224);
    }

    #[test]
    fn apply_result_is_zero_sum_within_rounding() {
        let (red, black) = apply_result(1200, 1200, 1.0, 32);
        assert_eq!(red - 1200, 1200 - black);
    }

    #[test]
    fn draw_between_equal_ratings_does_not_move_rating() {
        let (red, black) = apply_result(1500, 1500, 0.5, 32);
        assert_eq!(red, 1500);
        assert_eq!(black, 1500);
    }
}
