//! Accuracy metrics for pipeline runs against labelled expectations
//!
//! Classification metrics for the filter stage, exact-set accuracy for
//! category detection, regression metrics for ratings and a confidence
//! calibration summary. [`evaluate_dataset`] runs a labelled dataset through
//! the pipeline and builds the report.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::log_info;
use crate::pipeline::{Orchestrator, PipelineResult, PipelineStatus};
use crate::types::{Tender, TenderCategory};

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

/// Confusion matrix of relevance decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl FilterMetrics {
    pub fn add_prediction(&mut self, predicted: bool, expected: bool) {
        match (predicted, expected) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, true) => self.false_negatives += 1,
            (false, false) => self.true_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall
    pub fn f1_score(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// True negative rate
    pub fn specificity(&self) -> f64 {
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }
}

/// Exact-set accuracy of detected categories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryMetrics {
    pub correct: usize,
    pub total: usize,
}

impl CategoryMetrics {
    pub fn add_prediction(&mut self, predicted: &[TenderCategory], expected: &[TenderCategory]) {
        self.total += 1;
        let predicted: BTreeSet<_> = predicted.iter().collect();
        let expected: BTreeSet<_> = expected.iter().collect();
        if predicted == expected {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }
}

/// Score error against the midpoint of an expected range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatingMetrics {
    pub actual_scores: Vec<f64>,
    pub predicted_scores: Vec<f64>,
    pub correct_recommendations: usize,
    pub total_recommendations: usize,
}

impl RatingMetrics {
    pub fn add_prediction(&mut self, predicted: f64, expected_range: (f64, f64)) {
        self.actual_scores
            .push(f64::midpoint(expected_range.0, expected_range.1));
        self.predicted_scores.push(predicted);
    }

    /// Compare go/no-go decisions, ignoring the reasoning that follows
    pub fn add_recommendation(&mut self, predicted: &str, expected: &str) {
        self.total_recommendations += 1;
        if recommendation_decision(predicted) == recommendation_decision(expected) {
            self.correct_recommendations += 1;
        }
    }

    fn errors(&self) -> impl Iterator<Item = f64> + '_ {
        self.predicted_scores
            .iter()
            .zip(&self.actual_scores)
            .map(|(p, a)| p - a)
    }

    /// Mean absolute error
    pub fn mae(&self) -> f64 {
        mean(&self.errors().map(f64::abs).collect::<Vec<_>>())
    }

    /// Root mean squared error
    pub fn rmse(&self) -> f64 {
        mean(&self.errors().map(|e| e * e).collect::<Vec<_>>()).sqrt()
    }

    /// Pearson correlation between expected midpoints and predictions
    pub fn correlation(&self) -> f64 {
        if self.actual_scores.len() < 2 {
            return 0.0;
        }
        let mean_actual = mean(&self.actual_scores);
        let mean_pred = mean(&self.predicted_scores);

        let (mut numerator, mut var_actual, mut var_pred) = (0.0, 0.0, 0.0);
        for (a, p) in self.actual_scores.iter().zip(&self.predicted_scores) {
            numerator += (a - mean_actual) * (p - mean_pred);
            var_actual += (a - mean_actual).powi(2);
            var_pred += (p - mean_pred).powi(2);
        }

        let denominator = (var_actual * var_pred).sqrt();
        if denominator == 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }

    pub fn recommendation_accuracy(&self) -> f64 {
        ratio(self.correct_recommendations, self.total_recommendations)
    }
}

/// Normalized go/no-go decision at the start of a recommendation
pub fn recommendation_decision(text: &str) -> Option<&'static str> {
    let lowered = text.trim().to_lowercase();
    if lowered.starts_with("no-go") || lowered.starts_with("no go") || lowered.starts_with("nogo")
    {
        Some("no-go")
    } else if lowered.starts_with("go") {
        Some("go")
    } else {
        None
    }
}

/// How well filter confidence tracks actual correctness
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfidenceCalibration {
    predictions: Vec<(f64, bool)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub mean_confidence: f64,
    pub accuracy: f64,
    pub count: usize,
}

impl ConfidenceCalibration {
    pub fn add_prediction(&mut self, confidence: f64, correct: bool) {
        self.predictions.push((confidence, correct));
    }

    /// Equal-count bins over predictions sorted by confidence
    pub fn curve(&self, num_bins: usize) -> Vec<CalibrationBin> {
        let mut sorted = self.predictions.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let bin_size = sorted.len().div_ceil(num_bins.max(1)).max(1);

        sorted
            .chunks(bin_size)
            .map(|bin| {
                let confidences: Vec<f64> = bin.iter().map(|(c, _)| *c).collect();
                CalibrationBin {
                    mean_confidence: mean(&confidences),
                    accuracy: ratio(bin.iter().filter(|(_, ok)| *ok).count(), bin.len()),
                    count: bin.len(),
                }
            })
            .collect()
    }

    /// Count-weighted mean gap between confidence and accuracy (0 is perfect)
    pub fn expected_calibration_error(&self) -> f64 {
        let bins = self.curve(10);
        let total: usize = bins.iter().map(|b| b.count).sum();
        bins.iter()
            .map(|b| ratio(b.count, total) * (b.mean_confidence - b.accuracy).abs())
            .sum()
    }
}

/// Labelled expectation for one tender
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    pub relevant: bool,
    #[serde(default)]
    pub categories: Vec<TenderCategory>,
    /// Inclusive range the overall score should fall in
    #[serde(default)]
    pub score_range: Option<(f64, f64)>,
    /// Expected decision, e.g. "go" or "no-go"
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// One entry of an evaluation dataset file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledCase {
    pub tender: Tender,
    pub expected: ExpectedOutcome,
}

/// Parse a JSON array of `{"tender": .., "expected": ..}` entries
pub fn parse_dataset(content: &str) -> serde_json::Result<Vec<LabelledCase>> {
    serde_json::from_str(content)
}

/// Per-tender line of an evaluation report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub tender_id: String,
    pub status: PipelineStatus,
    /// Unset for errored runs
    pub relevance_correct: Option<bool>,
    pub confidence: Option<f64>,
    pub overall_score: Option<f64>,
    pub score_in_range: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All metrics for a labelled evaluation set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub total_cases: usize,
    /// Runs that ended in `Error` and were excluded from the metrics
    pub errors: usize,
    pub filter: FilterMetrics,
    pub categories: CategoryMetrics,
    pub rating: RatingMetrics,
    pub calibration: ConfidenceCalibration,
    pub cases: Vec<CaseOutcome>,
    /// Wall-clock time of the whole run; zero when built from existing results
    pub processing_seconds: f64,
}

impl EvaluationReport {
    pub fn from_cases(cases: &[(PipelineResult, ExpectedOutcome)]) -> Self {
        let mut report = Self {
            total_cases: cases.len(),
            ..Self::default()
        };

        for (result, expected) in cases {
            let mut outcome = CaseOutcome {
                tender_id: result.tender.id.clone(),
                status: result.status,
                relevance_correct: None,
                confidence: None,
                overall_score: None,
                score_in_range: None,
                error: result.failure.as_ref().map(|f| f.message.clone()),
            };

            let filter = match &result.filter_result {
                Some(filter) if !result.is_error() => filter,
                _ => {
                    report.errors += 1;
                    report.cases.push(outcome);
                    continue;
                }
            };

            let correct = filter.is_relevant == expected.relevant;
            outcome.relevance_correct = Some(correct);
            outcome.confidence = Some(filter.confidence);
            report.filter.add_prediction(filter.is_relevant, expected.relevant);
            report.calibration.add_prediction(filter.confidence, correct);

            if expected.relevant {
                report
                    .categories
                    .add_prediction(&filter.categories, &expected.categories);
            }

            if let Some(rating) = &result.rating_result {
                outcome.overall_score = Some(rating.overall_score);
                if let Some(range) = expected.score_range {
                    report.rating.add_prediction(rating.overall_score, range);
                    outcome.score_in_range =
                        Some((range.0..=range.1).contains(&rating.overall_score));
                }
                if let Some(recommendation) = &expected.recommendation {
                    report
                        .rating
                        .add_recommendation(&rating.recommendation, recommendation);
                }
            }
            report.cases.push(outcome);
        }

        report
    }

    /// Report as a Markdown document
    pub fn to_markdown(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {title}\n");
        let _ = writeln!(out, "- **Test cases:** {}", self.total_cases);
        let _ = writeln!(out, "- **Errors:** {}", self.errors);
        let _ = writeln!(out, "- **Processing time:** {:.2}s\n", self.processing_seconds);

        let f = &self.filter;
        let _ = writeln!(out, "## Filter\n");
        let _ = writeln!(out, "| Metric | Value |\n|--------|-------|");
        for (name, value) in [
            ("Precision", f.precision()),
            ("Recall", f.recall()),
            ("F1 score", f.f1_score()),
            ("Accuracy", f.accuracy()),
            ("Specificity", f.specificity()),
        ] {
            let _ = writeln!(out, "| {name} | {:.2}% |", value * 100.0);
        }
        let _ = writeln!(
            out,
            "\n| | Predicted relevant | Predicted irrelevant |\n|---|---|---|\n\
             | Relevant | {} | {} |\n| Irrelevant | {} | {} |\n",
            f.true_positives, f.false_negatives, f.false_positives, f.true_negatives
        );

        let _ = writeln!(out, "## Categories\n");
        let _ = writeln!(
            out,
            "- **Accuracy:** {:.2}% ({}/{})\n",
            self.categories.accuracy() * 100.0,
            self.categories.correct,
            self.categories.total
        );

        let _ = writeln!(out, "## Rating\n");
        if self.rating.predicted_scores.is_empty() {
            let _ = writeln!(out, "*No rating predictions evaluated*\n");
        } else {
            let _ = writeln!(out, "| Metric | Value |\n|--------|-------|");
            let _ = writeln!(out, "| MAE | {:.2} |", self.rating.mae());
            let _ = writeln!(out, "| RMSE | {:.2} |", self.rating.rmse());
            let _ = writeln!(out, "| Correlation | {:.2} |", self.rating.correlation());
            if self.rating.total_recommendations > 0 {
                let _ = writeln!(
                    out,
                    "| Recommendation accuracy | {:.2}% |",
                    self.rating.recommendation_accuracy() * 100.0
                );
            }
            out.push('\n');
        }

        let _ = writeln!(out, "## Confidence calibration\n");
        let _ = writeln!(
            out,
            "- **Expected calibration error:** {:.4} (0 is perfectly calibrated)",
            self.calibration.expected_calibration_error()
        );
        out
    }
}

/// Run every labelled tender through the pipeline and score the results
///
/// Concurrency is bounded by the orchestrator's `max_concurrent_tenders`.
pub async fn evaluate_dataset(
    orchestrator: &Orchestrator,
    cases: Vec<LabelledCase>,
) -> EvaluationReport {
    let started = Instant::now();
    let (tenders, expected): (Vec<Tender>, Vec<ExpectedOutcome>) = cases
        .into_iter()
        .map(|case| (case.tender, case.expected))
        .unzip();

    let results = orchestrator.process_batch(tenders).await;
    let pairs: Vec<_> = results.into_iter().zip(expected).collect();

    let mut report = EvaluationReport::from_cases(&pairs);
    report.processing_seconds = started.elapsed().as_secs_f64();
    log_info!(
        "Evaluated {} case(s) in {:.2}s: filter F1 {:.3}, category accuracy {:.3}, \
         rating MAE {:.3}",
        report.total_cases,
        report.processing_seconds,
        report.filter.f1_score(),
        report.categories.accuracy(),
        report.rating.mae()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_metrics_from_confusion_matrix() {
        let mut m = FilterMetrics::default();
        for (p, e) in [(true, true), (true, true), (true, false), (false, true), (false, false)] {
            m.add_prediction(p, e);
        }
        assert!((m.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.f1_score() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.accuracy() - 0.6).abs() < 1e-9);
        assert!((m.specificity() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_metrics_are_zero() {
        let m = FilterMetrics::default();
        assert!(m.precision().abs() < f64::EPSILON);
        assert!(m.f1_score().abs() < f64::EPSILON);
        assert!(RatingMetrics::default().correlation().abs() < f64::EPSILON);
    }

    #[test]
    fn category_accuracy_ignores_order() {
        let mut m = CategoryMetrics::default();
        m.add_prediction(
            &[TenderCategory::Ai, TenderCategory::Software],
            &[TenderCategory::Software, TenderCategory::Ai],
        );
        m.add_prediction(&[TenderCategory::Ai], &[TenderCategory::Cybersecurity]);
        assert!((m.accuracy() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rating_errors_use_range_midpoint() {
        let mut m = RatingMetrics::default();
        m.add_prediction(8.0, (6.0, 8.0));
        m.add_prediction(3.0, (2.0, 6.0));
        assert!((m.mae() - 1.0).abs() < 1e-9);
        assert!((m.rmse() - 1.0).abs() < 1e-9);
        assert!((m.correlation() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recommendations_compare_decisions() {
        assert_eq!(recommendation_decision("Go - strong fit"), Some("go"));
        assert_eq!(recommendation_decision("No-Go: too risky"), Some("no-go"));
        assert_eq!(recommendation_decision("maybe"), None);

        let mut m = RatingMetrics::default();
        m.add_recommendation("GO, bid aggressively", "go");
        m.add_recommendation("No go", "go");
        assert!((m.recommendation_accuracy() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn perfectly_calibrated_predictions_have_zero_error() {
        let mut c = ConfidenceCalibration::default();
        c.add_prediction(1.0, true);
        c.add_prediction(1.0, true);
        c.add_prediction(0.0, false);
        assert!(c.expected_calibration_error().abs() < 1e-9);
    }

    #[test]
    fn calibration_bins_cover_all_predictions() {
        let mut c = ConfidenceCalibration::default();
        for i in 0..15u8 {
            c.add_prediction(f64::from(i) / 15.0, i % 2 == 0);
        }
        let bins = c.curve(10);
        assert_eq!(bins.len(), 8);
        assert!(bins[..7].iter().all(|b| b.count == 2));
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 15);
    }

    #[test]
    fn markdown_lists_each_section() {
        let mut report = EvaluationReport {
            total_cases: 1,
            ..EvaluationReport::default()
        };
        report.filter.add_prediction(true, true);
        let markdown = report.to_markdown("Nightly");
        assert!(markdown.starts_with("# Nightly"));
        assert!(markdown.contains("| Precision | 100.00% |"));
        assert!(markdown.contains("*No rating predictions evaluated*"));
        assert!(markdown.contains("## Confidence calibration"));
    }
}
