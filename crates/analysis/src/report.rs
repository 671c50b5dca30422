use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Structured output of the analysis capability.
///
/// Named sections of free text; the pipeline persists this as a serialized
/// document and never interprets the section contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Whether the document looks like a genuine diagnostic blood report.
    pub verification_result: String,

    /// Summary of notable lab values and high-level medical recommendations.
    pub doctor_analysis: String,

    /// Dietary guidance derived from the report.
    pub nutrition_advice: String,

    /// Exercise guidance derived from the report.
    pub exercise_plan: String,

    /// Wall-clock duration of the analysis, filled in by the executor.
    #[serde(default)]
    pub processing_time: String,
}

impl AnalysisReport {
    pub fn new(
        verification_result: impl Into<String>,
        doctor_analysis: impl Into<String>,
        nutrition_advice: impl Into<String>,
        exercise_plan: impl Into<String>,
    ) -> Self {
        Self {
            verification_result: verification_result.into(),
            doctor_analysis: doctor_analysis.into(),
            nutrition_advice: nutrition_advice.into(),
            exercise_plan: exercise_plan.into(),
            processing_time: String::new(),
        }
    }

    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = format!("{:.2} seconds", elapsed.as_secs_f64());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_section_names() {
        let report = AnalysisReport::new("ok", "summary", "eat well", "walk")
            .with_processing_time(Duration::from_millis(1500));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["verification_result"], "ok");
        assert_eq!(value["doctor_analysis"], "summary");
        assert_eq!(value["nutrition_advice"], "eat well");
        assert_eq!(value["exercise_plan"], "walk");
        assert_eq!(value["processing_time"], "1.50 seconds");
    }

    #[test]
    fn deserializes_without_processing_time() {
        let report: AnalysisReport = serde_json::from_value(serde_json::json!({
            "verification_result": "ok",
            "doctor_analysis": "a",
            "nutrition_advice": "b",
            "exercise_plan": "c",
        }))
        .unwrap();
        assert!(report.processing_time.is_empty());
    }
}
