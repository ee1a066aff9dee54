//! Wire types for model verdicts.

use serde::{Deserialize, Serialize};

/// Media bytes handed to a model call.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

/// Verdict of a same-take comparison.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SameTakeVerdict {
    pub same_take: bool,
}

/// Verdict of a pairwise quality comparison.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityVerdict {
    /// 1 if the first media wins, 2 if the second does.
    pub winner: u8,
    /// Model-provided explanation.
    pub reasoning: String,
    /// Confidence in [0, 1]; scales the Elo step.
    pub confidence: f64,
}

impl QualityVerdict {
    /// Clamp out-of-range model output into the documented domain.
    pub fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Name suggested for a bucket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketNameSuggestion {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parsing() {
        let verdict: QualityVerdict = serde_json::from_str(
            r#"{"winner":2,"reasoning":"sharper focus, better framing","confidence":0.85}"#,
        )
        .unwrap();
        assert_eq!(verdict.winner, 2);
        assert!((verdict.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_clamped() {
        let verdict = QualityVerdict {
            winner: 1,
            reasoning: String::new(),
            confidence: 1.7,
        }
        .normalized();
        assert_eq!(verdict.confidence, 1.0);
    }
}
