//! Pure winner math over grouped vote counts.

use crate::model::CandidateId;

/// Reduce grouped per-candidate counts to
/// `(total_votes, max_votes, winners, winner_percentage)`.
///
/// Every candidate whose count equals the maximum is a winner; ties are
/// surfaced rather than broken. The caller guarantees the slice is
/// non-empty.
pub fn summarize(vote_counts: &[(CandidateId, u64)]) -> (u64, u64, Vec<CandidateId>, f64) {
    let total: u64 = vote_counts.iter().map(|(_, c)| c).sum();
    let max = vote_counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let winners: Vec<CandidateId> = vote_counts
        .iter()
        .filter(|(_, c)| *c == max)
        .map(|(id, _)| *id)
        .collect();
    (total, max, winners, winner_percentage(max, total))
}

/// Winning share as a percentage, rounded to two decimal places.
pub fn winner_percentage(max_votes: u64, total_votes: u64) -> f64 {
    if total_votes == 0 {
        return 0.0;
    }
    let pct = max_votes as f64 / total_votes as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(raw: &[(i64, u64)]) -> Vec<(CandidateId, u64)> {
        raw.iter().map(|&(id, c)| (CandidateId(id), c)).collect()
    }

    #[test]
    fn test_single_winner() {
        let (total, max, winners, pct) = summarize(&counts(&[(1, 7), (2, 3)]));
        assert_eq!(total, 10);
        assert_eq!(max, 7);
        assert_eq!(winners, vec![CandidateId(1)]);
        assert_eq!(pct, 70.0);
    }

    #[test]
    fn test_tie_marks_all_max_candidates() {
        // Votes {A:3, B:5, C:5}: B and C tie at the maximum.
        let (total, max, winners, pct) = summarize(&counts(&[(1, 3), (2, 5), (3, 5)]));
        assert_eq!(total, 13);
        assert_eq!(max, 5);
        assert_eq!(winners, vec![CandidateId(2), CandidateId(3)]);
        assert_eq!(pct, 38.46);
    }

    #[test]
    fn test_unanimous() {
        let (total, max, winners, pct) = summarize(&counts(&[(4, 9)]));
        assert_eq!((total, max), (9, 9));
        assert_eq!(winners, vec![CandidateId(4)]);
        assert_eq!(pct, 100.0);
    }

    #[test]
    fn test_percentage_rounds_to_two_places() {
        assert_eq!(winner_percentage(1, 3), 33.33);
        assert_eq!(winner_percentage(2, 3), 66.67);
        assert_eq!(winner_percentage(5, 13), 38.46);
        assert_eq!(winner_percentage(0, 0), 0.0);
    }
}
