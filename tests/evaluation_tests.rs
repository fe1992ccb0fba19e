#![allow(clippy::unwrap_used)]

use procurement_ai::evaluation::{
    EvaluationReport, ExpectedOutcome, LabelledCase, evaluate_dataset, parse_dataset,
};
use procurement_ai::pipeline::{Orchestrator, PipelineStatus};
use procurement_ai::types::TenderCategory;
use std::sync::Arc;

use test_utils::{Agent, MockDataBuilder, Reply, ScriptedBackend, test_config};

fn expect_security() -> ExpectedOutcome {
    ExpectedOutcome {
        relevant: true,
        categories: vec![TenderCategory::Cybersecurity],
        score_range: Some((7.0, 9.0)),
        recommendation: Some("go".into()),
    }
}

fn expect_irrelevant() -> ExpectedOutcome {
    ExpectedOutcome {
        relevant: false,
        ..ExpectedOutcome::default()
    }
}

#[tokio::test]
async fn test_report_from_pipeline_runs() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_text(
                Agent::Filter,
                MockDataBuilder::filter_json(true, 0.9, &["cybersecurity"]),
            )
            .with_text(Agent::Rating, MockDataBuilder::rating_json(8.0))
            .with_text(Agent::Generator, MockDataBuilder::bid_json()),
    );
    let result = Orchestrator::with_backend(backend, &test_config(), None)
        .process(MockDataBuilder::security_tender())
        .await;
    assert_eq!(result.status, PipelineStatus::Complete);

    let report = EvaluationReport::from_cases(&[(result, expect_security())]);

    assert_eq!(report.total_cases, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.filter.true_positives, 1);
    assert!((report.filter.precision() - 1.0).abs() < 1e-9);
    assert!((report.categories.accuracy() - 1.0).abs() < 1e-9);
    assert!(report.rating.mae().abs() < 1e-9);
    assert!((report.rating.recommendation_accuracy() - 1.0).abs() < 1e-9);
    assert_eq!(report.cases[0].score_in_range, Some(true));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["filter"]["true_positives"], 1);
    assert_eq!(json["cases"][0]["tender_id"], "TEST-A");
}

#[tokio::test]
async fn test_errored_runs_are_excluded_from_metrics() {
    // Relevant filter verdict, then the rating backend never answers
    let backend = Arc::new(ScriptedBackend::new().with_text(
        Agent::Filter,
        MockDataBuilder::filter_json(true, 0.6, &["other"]),
    ));
    let result = Orchestrator::with_backend(backend, &test_config(), None)
        .process(MockDataBuilder::catering_tender())
        .await;
    assert_eq!(result.status, PipelineStatus::Error);
    assert!(result.filter_result.is_some());

    let report = EvaluationReport::from_cases(&[(result, expect_irrelevant())]);

    assert_eq!(report.errors, 1);
    assert_eq!(report.filter.total(), 0);
    assert_eq!(report.categories.total, 0);
    assert!(report.calibration.curve(10).is_empty());
    assert_eq!(report.cases.len(), 1);
    assert_eq!(report.cases[0].relevance_correct, None);
    assert!(report.cases[0].error.is_some());
}

#[tokio::test]
async fn test_evaluate_dataset_scores_every_case() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_replies(
                Agent::Filter,
                [
                    Reply::Text(MockDataBuilder::filter_json(true, 0.9, &["cybersecurity"])),
                    Reply::Text(MockDataBuilder::filter_json(false, 0.95, &[])),
                    Reply::Text(MockDataBuilder::filter_json(true, 0.7, &["software"])),
                ],
            )
            .with_text(Agent::Rating, MockDataBuilder::rating_json(8.0))
            .with_text(Agent::Generator, MockDataBuilder::bid_json()),
    );
    // One run at a time keeps the scripted replies aligned with the cases
    let mut config = test_config();
    config.pipeline.max_concurrent_tenders = 1;
    let orchestrator = Orchestrator::with_backend(backend.clone(), &config, None);

    let cases = vec![
        LabelledCase {
            tender: MockDataBuilder::security_tender(),
            expected: expect_security(),
        },
        LabelledCase {
            tender: MockDataBuilder::catering_tender(),
            expected: expect_irrelevant(),
        },
        LabelledCase {
            tender: MockDataBuilder::marginal_tender(),
            expected: expect_irrelevant(),
        },
    ];
    let report = evaluate_dataset(&orchestrator, cases).await;

    assert_eq!(report.total_cases, 3);
    assert_eq!(report.errors, 1);
    assert_eq!(report.filter.true_positives, 1);
    assert_eq!(report.filter.true_negatives, 1);
    assert_eq!(report.filter.false_positives, 0);
    assert!((report.filter.accuracy() - 1.0).abs() < 1e-9);
    assert_eq!(report.rating.predicted_scores, vec![8.0]);

    let ids: Vec<_> = report.cases.iter().map(|c| c.tender_id.as_str()).collect();
    assert_eq!(ids, vec!["TEST-A", "TEST-B", "TEST-C"]);
    assert_eq!(report.cases[1].status, PipelineStatus::FilteredOut);
    assert_eq!(report.cases[2].status, PipelineStatus::Error);
    assert!(report.processing_seconds >= 0.0);
    assert_eq!(backend.calls(Agent::Generator), 1);
}

#[test]
fn test_dataset_entries_pair_tenders_with_expectations() {
    let cases = parse_dataset(
        r#"[{
            "tender": {"id": "EV-1", "title": "SOC services", "description": "24/7 monitoring",
                       "organization": "Port Authority"},
            "expected": {"relevant": true, "categories": ["cybersecurity"], "score_range": [6.0, 9.0]}
        }]"#,
    )
    .unwrap();

    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].tender.id, "EV-1");
    assert_eq!(cases[0].expected.score_range, Some((6.0, 9.0)));
    assert!(parse_dataset(r#"{"tender": {}}"#).is_err());
}

#[test]
fn test_expected_outcomes_deserialize_with_defaults() {
    let expected: ExpectedOutcome =
        serde_json::from_str(r#"{"relevant": true, "categories": ["ai", "software"]}"#).unwrap();
    assert!(expected.relevant);
    assert_eq!(
        expected.categories,
        vec![TenderCategory::Ai, TenderCategory::Software]
    );
    assert!(expected.score_range.is_none());
    assert!(expected.recommendation.is_none());
}
