use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::job::JobResultFields;

/// Sub-scores reported alongside the hit factor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Scores {
    #[garde(range(min = 0, max = 100))]
    pub audio: i32,
    #[garde(range(min = 0, max = 100))]
    pub lyrics: i32,
    #[garde(range(min = 0, max = 100))]
    pub brand: i32,
    #[garde(range(min = 0, max = 100))]
    pub market: i32,
}

/// A single piece of A&R advice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub note: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarHit {
    pub song: String,
    pub artist: String,
    pub year: i32,
    pub similarity: f64,
}

/// Output of the analysis adapter.
///
/// Only the scores are interpreted here; any additional fields the analyzer
/// returns (audio features and the like) are carried through untouched into
/// the full report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct AnalysisResult {
    #[garde(range(min = 0, max = 100))]
    pub hit_factor: i32,

    #[garde(dive)]
    pub scores: Scores,

    #[serde(default)]
    #[garde(skip)]
    pub recommendations: Vec<Recommendation>,

    #[serde(default)]
    #[garde(skip)]
    pub similar_hits: Vec<SimilarHit>,

    #[garde(length(min = 1))]
    pub model_version: String,

    #[serde(flatten)]
    #[garde(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisResult {
    /// Column values persisted on completion.
    pub fn to_result_fields(&self, elapsed: Duration) -> Result<JobResultFields, serde_json::Error> {
        Ok(JobResultFields {
            hit_factor: self.hit_factor,
            audio_score: self.scores.audio,
            lyrics_score: self.scores.lyrics,
            brand_score: self.scores.brand,
            market_score: self.scores.market,
            recommendations: serde_json::to_value(&self.recommendations)?,
            similar_hits: serde_json::to_value(&self.similar_hits)?,
            full_report: serde_json::to_value(self)?,
            model_version: self.model_version.clone(),
            processing_time: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "hit_factor": 78,
            "scores": {"audio": 85, "lyrics": 60, "brand": 75, "market": 70},
            "recommendations": [
                {"type": "marketing", "note": "Pitch to playlists.", "priority": "high"}
            ],
            "similar_hits": [
                {"song": "Blinding Lights", "artist": "The Weeknd", "year": 2020, "similarity": 0.78}
            ],
            "features": {"tempo": 118.0},
            "model_version": "AURA-v2.1"
        })
    }

    #[test]
    fn test_extra_fields_are_preserved() {
        let result: AnalysisResult = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(result.hit_factor, 78);
        assert_eq!(result.recommendations[0].kind, "marketing");
        assert!(result.extra.contains_key("features"));

        let round = serde_json::to_value(&result).unwrap();
        assert_eq!(round["features"]["tempo"], 118.0);
        assert_eq!(round["recommendations"][0]["type"], "marketing");
    }

    #[test]
    fn test_score_range_validation() {
        let mut result: AnalysisResult = serde_json::from_value(sample_json()).unwrap();
        assert!(result.validate().is_ok());

        result.scores.market = 101;
        assert!(result.validate().is_err());

        result.scores.market = 70;
        result.hit_factor = -1;
        assert!(result.validate().is_err());
    }

    #[test]
    fn test_result_fields() {
        let result: AnalysisResult = serde_json::from_value(sample_json()).unwrap();
        let fields = result.to_result_fields(Duration::from_millis(1500)).unwrap();
        assert_eq!(fields.hit_factor, 78);
        assert_eq!(fields.audio_score, 85);
        assert_eq!(fields.market_score, 70);
        assert_eq!(fields.processing_time, 1500);
        assert_eq!(fields.similar_hits[0]["artist"], "The Weeknd");
        assert_eq!(fields.full_report["model_version"], "AURA-v2.1");
    }
}
