//! Pure Elo-style rating delta calculator. No I/O, no knowledge of users or
//! games — just numbers in, numbers out. The floor is applied by the caller
//! at write time, not here, per spec.

pub const RATING_FLOOR: i32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    AWins,
    BWins,
    Draw,
}

#[derive(Clone, Copy, Debug)]
pub struct RatingInput {
    pub rating_a: i32,
    pub games_a: i32,
    pub rating_b: i32,
    pub games_b: i32,
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatingDelta {
    pub delta_a: i32,
    pub delta_b: i32,
}

fn k_factor(games_played: i32) -> f64 {
    if games_played < 10 {
        32.0
    } else if games_played < 30 {
        24.0
    } else {
        16.0
    }
}

fn expected_score(rating: i32, opponent_rating: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - rating) as f64 / 400.0))
}

fn actual_score(outcome: Outcome, perspective_is_a: bool) -> f64 {
    match (outcome, perspective_is_a) {
        (Outcome::AWins, true) | (Outcome::BWins, false) => 1.0,
        (Outcome::Draw, _) => 0.5,
        (Outcome::AWins, false) | (Outcome::BWins, true) => 0.0,
    }
}

pub fn compute(input: RatingInput) -> RatingDelta {
    let expected_a = expected_score(input.rating_a, input.rating_b);
    let expected_b = 1.0 - expected_a;
    let score_a = actual_score(input.outcome, true);
    let score_b = actual_score(input.outcome, false);

    let delta_a = (k_factor(input.games_a) * (score_a - expected_a)).round() as i32;
    let delta_b = (k_factor(input.games_b) * (score_b - expected_b)).round() as i32;

    RatingDelta { delta_a, delta_b }
}

/// Applied at the moment a rating is written, never during calculation.
pub fn apply_floor(rating: i32) -> i32 {
    rating.max(RATING_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_decisive_result_splits_k_evenly() {
        let delta = compute(RatingInput {
            rating_a: 1200,
            games_a: 5,
            rating_b: 1200,
            games_b: 5,
            outcome: Outcome::AWins,
        });
        assert_eq!(delta.delta_a, 16);
        assert_eq!(delta.delta_b, -16);
    }

    #[test]
    fn draw_between_equals_changes_nothing() {
        let delta = compute(RatingInput {
            rating_a: 1400,
            games_a: 50,
            rating_b: 1400,
            games_b: 50,
            outcome: Outcome::Draw,
        });
        assert_eq!(delta.delta_a, 0);
        assert_eq!(delta.delta_b, 0);
    }

    #[test]
    fn k_factor_shrinks_with_games_played() {
        let veteran_beats_veteran = compute(RatingInput {
            rating_a: 1500,
            games_a: 40,
            rating_b: 1500,
            games_b: 40,
            outcome: Outcome::AWins,
        });
        assert_eq!(veteran_beats_veteran.delta_a, 8);
    }

    #[test]
    fn underdog_win_earns_more_than_expected_win() {
        let underdog = compute(RatingInput {
            rating_a: 1200,
            games_a: 5,
            rating_b: 1600,
            games_b: 5,
            outcome: Outcome::AWins,
        });
        let favorite = compute(RatingInput {
            rating_a: 1600,
            games_a: 5,
            rating_b: 1200,
            games_b: 5,
            outcome: Outcome::AWins,
        });
        assert!(underdog.delta_a > favorite.delta_a);
    }

    #[test]
    fn floor_clamps_low_ratings_but_not_calculation() {
        assert_eq!(apply_floor(40), 100);
        assert_eq!(apply_floor(150), 150);
    }
}
