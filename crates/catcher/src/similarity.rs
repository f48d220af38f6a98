use catcher_domain::event::EventId;
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("vector length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding of event {event_id} has {actual} dimensions, expected {expected}")]
    CandidateMismatch {
        event_id: EventId,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub event_id: EventId,
    pub score: f32,
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns `Ok(None)` when either vector has zero norm, since the angle is
/// undefined there.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<Option<f32>, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator <= f64::EPSILON {
        return Ok(None);
    }

    Ok(Some((dot / denominator) as f32))
}

/// Every candidate scoring strictly above `threshold`, best first. Equal
/// scores are ordered by ascending event id so the result does not depend on
/// the order candidates were supplied in.
pub fn rank<'a, I>(
    query: &[f32],
    candidates: I,
    threshold: f32,
) -> Result<Vec<Match>, SimilarityError>
where
    I: IntoIterator<Item = (EventId, &'a [f32])>,
{
    let mut matches = Vec::new();
    for (event_id, vector) in candidates {
        let score = cosine_similarity(query, vector).map_err(|_| {
            SimilarityError::CandidateMismatch {
                event_id,
                expected: query.len(),
                actual: vector.len(),
            }
        })?;

        if let Some(score) = score.filter(|score| *score > threshold) {
            matches.push(Match { event_id, score });
        }
    }

    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-6;

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3, -1.2, 4.0, 0.0];
        let score = cosine_similarity(&v, &v).unwrap().unwrap();
        assert!((score - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let score = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 5.0, 0.0])
            .unwrap()
            .unwrap();
        assert!(score.abs() < TOLERANCE);
    }

    #[test]
    fn zero_norm_is_undefined_not_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), Ok(None));
        assert_eq!(cosine_similarity(&[], &[]), Ok(None));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert_eq!(
            cosine_similarity(&[1.0, 2.0], &[1.0]),
            Err(SimilarityError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );

        let short = [1.0f32];
        let err = rank(&[1.0, 0.0], [(EventId(4), &short[..])], 0.5).unwrap_err();
        assert_eq!(
            err,
            SimilarityError::CandidateMismatch {
                event_id: EventId(4),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn rank_filters_sorts_and_breaks_ties_by_id() {
        let query = [1.0f32, 0.0];
        let same = [2.0f32, 0.0];
        let close = [0.95f32, 0.1];
        let far = [0.0f32, 1.0];
        let zero = [0.0f32, 0.0];

        let candidates = vec![
            (EventId(9), &close[..]),
            (EventId(7), &same[..]),
            (EventId(3), &far[..]),
            (EventId(2), &same[..]),
            (EventId(5), &zero[..]),
        ];

        let ranked = rank(&query, candidates.clone(), DEFAULT_SIMILARITY_THRESHOLD).unwrap();
        let ids: Vec<EventId> = ranked.iter().map(|m| m.event_id).collect();
        assert_eq!(ids, vec![EventId(2), EventId(7), EventId(9)]);

        let mut reversed = candidates;
        reversed.reverse();
        assert_eq!(
            rank(&query, reversed, DEFAULT_SIMILARITY_THRESHOLD).unwrap(),
            ranked,
            "ranking must not depend on input order"
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        let query = [1.0f32, 0.0];
        let candidate = [1.0f32, 0.0];
        assert!(rank(&query, [(EventId(1), &candidate[..])], 1.0)
            .unwrap()
            .is_empty());
    }
}
