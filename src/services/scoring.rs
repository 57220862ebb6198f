//! Maps a model's raw (label, score) list onto the illustrated /
//! not-illustrated verdict plus a P(illustrated) confidence.

use crate::models::canvas::PredictedLabel;
use crate::services::classifier::LabelScore;

/// Verdict for one canvas image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: PredictedLabel,
    /// P(illustrated) in [0,1], regardless of which label won.
    pub confidence: f64,
}

/// Derive the verdict from an unordered score list.
///
/// When the model emits both expected labels, the higher score wins (ties go
/// to illustrated) and the confidence is the illustrated entry's raw score.
/// Backends are not guaranteed to emit both labels per call, so a single or
/// unrecognized entry falls back to the first element, inverting its score
/// when it names the other class. This fallback is best-effort: for
/// arbitrary multi-class outputs the first element need not be the most
/// informative one.
pub fn map_scores(scores: &[LabelScore]) -> Classification {
    let illustrated = scores
        .iter()
        .find(|entry| entry.label.eq_ignore_ascii_case("illustrated"));
    let not_illustrated = scores.iter().find(|entry| {
        entry.label.eq_ignore_ascii_case("not-illustrated")
            || entry.label.eq_ignore_ascii_case("not illustrated")
    });

    if let (Some(illustrated), Some(not_illustrated)) = (illustrated, not_illustrated) {
        let label = if illustrated.score >= not_illustrated.score {
            PredictedLabel::Illustrated
        } else {
            PredictedLabel::NotIllustrated
        };
        return Classification {
            label,
            confidence: clamp_unit(illustrated.score),
        };
    }

    match scores.first() {
        None => Classification {
            label: PredictedLabel::NotIllustrated,
            confidence: 0.0,
        },
        Some(first) => {
            let label = if first.label.eq_ignore_ascii_case("illustrated") {
                PredictedLabel::Illustrated
            } else {
                PredictedLabel::NotIllustrated
            };
            let confidence = match label {
                PredictedLabel::Illustrated => first.score,
                PredictedLabel::NotIllustrated => 1.0 - first.score,
            };
            Classification {
                label,
                confidence: clamp_unit(confidence),
            }
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
