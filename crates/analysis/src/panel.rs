//! Built-in rule-based analyzer.
//!
//! Heuristic, fully offline implementation of the [`Analyzer`] capability:
//! verifies the document looks like a lab panel by scanning for standard
//! report vocabulary, highlights lines that carry biomarker readings, and
//! attaches general nutrition and exercise guidance. Deployments with a real
//! reasoning engine swap it in behind the same trait.

use crate::analyzer::{AnalysisError, Analyzer};
use crate::report::AnalysisReport;

/// Vocabulary expected in a structured lab panel.
const PANEL_KEYWORDS: &[&str] = &[
    "reference range",
    "result",
    "units",
    "lab",
    "hemoglobin",
    "glucose",
];

/// Minimum keyword hits to call the document a plausible panel.
const MIN_KEYWORD_HITS: usize = 3;

/// Biomarkers whose presence is worth surfacing in the summary.
const MARKERS: &[&str] = &[
    "hemoglobin",
    "glucose",
    "cholesterol",
    "ferritin",
    "vitamin d",
    "vitamin b12",
    "triglycerides",
    "creatinine",
    "tsh",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct PanelAnalyzer;

impl PanelAnalyzer {
    fn verify(text: &str) -> String {
        let lowered = text.to_lowercase();
        let hits = PANEL_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .count();

        if hits >= MIN_KEYWORD_HITS {
            "Document appears to be a valid medical report with standard blood panel structure."
                .to_string()
        } else {
            "This may not be a typical blood report; the upload lacks structured lab panel \
             elements such as biomarkers, units, or reference ranges."
                .to_string()
        }
    }

    fn summarize(text: &str, query: &str) -> String {
        let lowered = text.to_lowercase();
        let mut findings: Vec<String> = Vec::new();

        for line in text.lines() {
            let line_lower = line.to_lowercase();
            if MARKERS.iter().any(|m| line_lower.contains(m)) {
                findings.push(format!("- {}", line.trim()));
            }
        }

        let mut summary = format!("In response to \"{query}\": ");
        if findings.is_empty() {
            summary.push_str(
                "no individual biomarker readings were recognized in the report text. \
                 Review the original document with a healthcare provider.",
            );
        } else {
            summary.push_str("the following readings stand out:\n");
            summary.push_str(&findings.join("\n"));
            summary.push_str(
                "\nDiscuss any values outside their reference range with a healthcare provider.",
            );
        }

        if lowered.contains("reference range") {
            summary.push_str(
                " Readings should be interpreted against the reference ranges printed alongside them.",
            );
        }
        summary
    }

    fn nutrition_advice() -> String {
        [
            "Include more iron-rich foods (spinach, lentils) if hemoglobin or ferritin is low.",
            "Ensure sufficient B12 and D3; consider fortified foods or supplements if flagged low.",
            "For elevated cholesterol, reduce saturated fats and increase fiber intake.",
            "Stay hydrated and consider electrolyte support for mineral imbalances.",
            "Consult a certified nutritionist or doctor before making dietary changes.",
        ]
        .join("\n")
    }

    fn exercise_plan() -> String {
        [
            "If lipid markers are elevated, emphasize aerobic training: 25-40 minute walks or cycling 4-5 times a week.",
            "Low vitamin D pairs well with moderate outdoor activity.",
            "Avoid high-intensity workouts while hemoglobin or iron is low; prioritize recovery and light movement.",
            "Add flexibility or strength training 2-3 times a week for overall balance.",
            "Obtain medical clearance before starting a new fitness regimen.",
        ]
        .join("\n")
    }
}

impl Analyzer for PanelAnalyzer {
    fn analyze(&self, text: &str, query: &str) -> Result<AnalysisReport, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(
                "no report text to analyze".to_string(),
            ));
        }

        Ok(AnalysisReport::new(
            Self::verify(text),
            Self::summarize(text, query),
            Self::nutrition_advice(),
            Self::exercise_plan(),
        ))
    }
}
