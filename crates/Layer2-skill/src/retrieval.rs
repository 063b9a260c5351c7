//! Similarity thresholds
//!
//! The index returns raw scores; which of them count as "relevant" depends on
//! the embedder's score distribution, so the cut is a deployment setting.

use crate::index::ScoredSkill;
use skillforge_foundation::SimilarityPolicy;

/// Keep the candidates that pass `policy` (input must be sorted, best first)
pub fn apply_similarity_policy(
    policy: &SimilarityPolicy,
    scored: Vec<ScoredSkill>,
) -> Vec<ScoredSkill> {
    let threshold = match *policy {
        SimilarityPolicy::Absolute { min_score } => min_score,
        SimilarityPolicy::RelativeToTop { ratio, floor } => {
            let top = scored.first().map(|s| s.score).unwrap_or(0.0);
            (top * ratio).max(floor)
        }
    };
    scored.into_iter().filter(|s| s.score >= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::Skill;

    fn scored(scores: &[f32]) -> Vec<ScoredSkill> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| ScoredSkill {
                skill: Skill::new(format!("skill-{i}"), "d", "x = 1"),
                score: *score,
            })
            .collect()
    }

    #[test]
    fn test_absolute() {
        let policy = SimilarityPolicy::Absolute { min_score: 0.5 };
        let kept = apply_similarity_policy(&policy, scored(&[0.9, 0.5, 0.49]));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_relative_to_top() {
        let policy = SimilarityPolicy::RelativeToTop {
            ratio: 0.8,
            floor: 0.2,
        };
        let kept = apply_similarity_policy(&policy, scored(&[0.5, 0.41, 0.39]));
        assert_eq!(kept.len(), 2);

        // floor wins when the top score is weak
        let kept = apply_similarity_policy(&policy, scored(&[0.15, 0.14]));
        assert!(kept.is_empty());

        assert!(apply_similarity_policy(&policy, Vec::new()).is_empty());
    }
}
