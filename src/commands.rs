use crate::cli::KbAddArgs;
use crate::config::Config;
use crate::evaluation::{self, EvaluationReport};
use crate::llm::schema::json_type_name;
use crate::pipeline::{Orchestrator, PipelineObserver, PipelineResult, PipelineStatus};
use crate::rag::{KnowledgeBase, KnowledgeExample};
use crate::types::Tender;
use crate::ui::{self, rgb};
use crate::{log_debug, log_error, log_info};
use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use indicatif::ProgressBar;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Width used when wrapping long text blocks
const WRAP_WIDTH: usize = 88;
/// Characters of content shown by `kb list --verbose`
const PREVIEW_CHARS: usize = 160;

/// Parse a single tender object or an array of tenders
pub fn parse_tenders(content: &str) -> Result<Vec<Tender>> {
    let value: Value = serde_json::from_str(content).context("Tender file is not valid JSON")?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).with_context(|| format!("Invalid tender at index {i}"))
            })
            .collect(),
        Value::Object(_) => Ok(vec![
            serde_json::from_value(value).context("Invalid tender object")?,
        ]),
        other => bail!(
            "Expected a tender object or an array of tenders, found {}",
            json_type_name(&other)
        ),
    }
}

/// Parse repeated `key=value` pairs; values that parse as JSON keep their type
pub fn parse_metadata(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut metadata = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid metadata '{pair}', expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid metadata '{pair}', key is empty");
        }
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Inline text, or the contents of a file when prefixed with `@`
fn read_content(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read content from {path}"))
        }
        None => Ok(arg.to_string()),
    }
}

/// Drives a progress bar from pipeline transitions
struct ProgressObserver {
    bar: ProgressBar,
}

impl PipelineObserver for ProgressObserver {
    fn on_transition(&self, tender_id: &str, _from: PipelineStatus, to: PipelineStatus) {
        if !to.is_terminal() {
            self.bar.set_message(format!("{tender_id}: {to}"));
        }
    }

    fn on_finished(&self, result: &PipelineResult) {
        self.bar.inc(1);
        match &result.failure {
            Some(failure) => log_error!(
                "{} failed at {} stage: {}",
                result.tender.id,
                failure.stage,
                failure.message
            ),
            None => log_debug!("{} done with status {}", result.tender.id, result.status),
        }
    }
}

fn open_knowledge_base(config: &Config) -> Result<KnowledgeBase> {
    KnowledgeBase::from_config(config).context("Failed to open knowledge base")
}

/// Handle the `analyze` command
pub async fn handle_analyze_command(config: &Config, file: &Path, json: bool) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read tender file {}", file.display()))?;
    let tenders = parse_tenders(&content)?;
    if tenders.is_empty() {
        ui::print_warning("No tenders found in input.");
        return Ok(());
    }
    log_info!("Analyzing {} tender(s) from {}", tenders.len(), file.display());

    let knowledge_base = if config.rag.enabled {
        let kb = open_knowledge_base(config)?;
        if kb.count() == 0 {
            log_debug!("Knowledge base is empty; bids will be generated without examples");
        }
        Some(Arc::new(kb))
    } else {
        None
    };

    let bar = ui::create_progress_bar(
        u64::try_from(tenders.len()).unwrap_or(u64::MAX),
        "Analyzing tenders",
    );
    let orchestrator = Orchestrator::from_config(config, knowledge_base)
        .with_observer(Arc::new(ProgressObserver { bar: bar.clone() }));

    let results = orchestrator.process_batch(tenders).await;
    bar.finish_and_clear();

    if json {
        let output = if let [single] = results.as_slice() {
            serde_json::to_string_pretty(single)?
        } else {
            serde_json::to_string_pretty(&results)?
        };
        println!("{output}");
        return Ok(());
    }

    for result in &results {
        print_result(result, config.pipeline.pursue_threshold);
    }
    if results.len() > 1 {
        print_batch_summary(&results);
    }
    Ok(())
}

fn print_result(result: &PipelineResult, threshold: f64) {
    let tender = &result.tender;
    ui::print_heading(&format!("{} · {}", tender.id, tender.title));
    print_row("Organization", &tender.organization);
    if let Some(deadline) = &tender.deadline {
        print_row("Deadline", deadline);
    }
    if let Some(value) = &tender.estimated_value {
        print_row("Value", value);
    }
    print_row("Status", &status_label(result.status));
    print_row(
        "Time",
        &format!("{:.2}s", result.processing_time.as_secs_f64()),
    );

    if let Some(filter) = &result.filter_result {
        let verdict = if filter.is_relevant {
            "relevant"
        } else {
            "not relevant"
        };
        let categories = filter.category_labels().join(", ");
        print_row(
            "Filter",
            &format!("{verdict} ({:.0}% confident) {categories}", filter.confidence * 100.0),
        );
        print_wrapped(&filter.reasoning);
    }

    if let Some(rating) = &result.rating_result {
        print_row(
            "Score",
            &format!(
                "{} {}",
                ui::color_score(rating.overall_score, threshold),
                ui::score_bar(rating.overall_score)
            ),
        );
        print_row(
            "Dimensions",
            &format!(
                "fit {:.1} · win {:.1} · effort {:.1} · risk {:.1} · urgency {:.1}",
                rating.strategic_fit,
                rating.win_probability,
                rating.effort_required,
                rating.risk_level,
                rating.urgency
            ),
        );
        for strength in &rating.strengths {
            ui::print_message(&format!("{:>14}  {}", "+".green(), strength));
        }
        for risk in &rating.risks {
            ui::print_message(&format!("{:>14}  {}", "-".red(), risk));
        }
        print_row("Recommendation", "");
        print_wrapped(&rating.recommendation);
    }

    if let Some(bid) = &result.bid_document {
        for (heading, body) in bid.sections() {
            ui::print_message(&format!("\n  {}", heading.bold()));
            print_wrapped(body);
        }
        if !bid.reference_examples.is_empty() {
            print_row("References", &bid.reference_examples.join(", "));
        }
    }

    if let Some(failure) = &result.failure {
        ui::print_error(&format!(
            "  {} failed ({}) after {} attempt(s): {}",
            failure.stage, failure.kind, failure.attempts, failure.message
        ));
    }
}

fn print_batch_summary(results: &[PipelineResult]) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        *counts.entry(result.status.to_string()).or_default() += 1;
    }
    ui::print_heading("Batch summary");
    for (status, count) in counts {
        print_row(&status, &count.to_string());
    }
}

fn status_label(status: PipelineStatus) -> String {
    let (r, g, b) = match status {
        PipelineStatus::Complete => rgb::SUCCESS_GREEN,
        PipelineStatus::Error => rgb::ERROR_RED,
        PipelineStatus::FilteredOut | PipelineStatus::RatedLow => rgb::AMBER,
        _ => rgb::SKY_BLUE,
    };
    status.to_string().truecolor(r, g, b).bold().to_string()
}

/// Print a config/result row with label and value
fn print_row(label: &str, value: &str) {
    let (r, g, b) = rgb::DIM_WHITE;
    ui::print_message(&format!("{}  {value}", format!("{label:>14}").truecolor(r, g, b)));
}

fn print_wrapped(text: &str) {
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent("                ")
        .subsequent_indent("                ");
    for line in textwrap::wrap(text.trim(), options) {
        ui::print_message(&line);
    }
}

/// Where `evaluate` sends its report
#[derive(Debug, Default)]
pub struct EvaluateOutput {
    pub json: bool,
    pub markdown: Option<PathBuf>,
    pub detailed: bool,
}

/// Handle the `evaluate` command
pub async fn handle_evaluate_command(
    config: &Config,
    dataset: &Path,
    output: &EvaluateOutput,
) -> Result<()> {
    let content = fs::read_to_string(dataset)
        .with_context(|| format!("Failed to read dataset {}", dataset.display()))?;
    let cases = evaluation::parse_dataset(&content)
        .with_context(|| format!("Invalid evaluation dataset {}", dataset.display()))?;
    if cases.is_empty() {
        ui::print_warning("Dataset contains no cases.");
        return Ok(());
    }
    log_info!("Evaluating {} case(s) from {}", cases.len(), dataset.display());

    let knowledge_base = if config.rag.enabled {
        Some(Arc::new(open_knowledge_base(config)?))
    } else {
        None
    };
    let bar = ui::create_progress_bar(
        u64::try_from(cases.len()).unwrap_or(u64::MAX),
        "Evaluating",
    );
    let orchestrator = Orchestrator::from_config(config, knowledge_base)
        .with_observer(Arc::new(ProgressObserver { bar: bar.clone() }));

    let report = evaluation::evaluate_dataset(&orchestrator, cases).await;
    bar.finish_and_clear();

    if let Some(path) = &output.markdown {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, report.to_markdown("Evaluation Report"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log_info!("Markdown report written to {}", path.display());
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_evaluation_report(&report, output.detailed);
        if let Some(path) = &output.markdown {
            ui::print_success(&format!("Markdown report saved to {}", path.display()));
        }
    }
    Ok(())
}

fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn print_evaluation_report(report: &EvaluationReport, detailed: bool) {
    ui::print_heading("Evaluation");
    print_row("Cases", &report.total_cases.to_string());
    print_row("Time", &format!("{:.2}s", report.processing_seconds));
    if report.errors > 0 {
        ui::print_warning(&format!("{} run(s) ended in error and were not scored", report.errors));
    }

    let f = &report.filter;
    ui::print_heading("Filter");
    print_row("Precision", &percent(f.precision()));
    print_row("Recall", &percent(f.recall()));
    print_row("F1", &percent(f.f1_score()));
    print_row("Accuracy", &percent(f.accuracy()));
    print_row("Specificity", &percent(f.specificity()));
    print_row(
        "Confusion",
        &format!(
            "TP {} · FN {} · FP {} · TN {}",
            f.true_positives, f.false_negatives, f.false_positives, f.true_negatives
        ),
    );

    ui::print_heading("Categories");
    print_row(
        "Accuracy",
        &format!(
            "{} ({}/{})",
            percent(report.categories.accuracy()),
            report.categories.correct,
            report.categories.total
        ),
    );

    ui::print_heading("Rating");
    if report.rating.predicted_scores.is_empty() {
        print_row("Scores", "no rating predictions evaluated");
    } else {
        print_row("MAE", &format!("{:.2}", report.rating.mae()));
        print_row("RMSE", &format!("{:.2}", report.rating.rmse()));
        print_row("Correlation", &format!("{:.2}", report.rating.correlation()));
    }
    if report.rating.total_recommendations > 0 {
        print_row(
            "Go/No-Go",
            &percent(report.rating.recommendation_accuracy()),
        );
    }

    ui::print_heading("Calibration");
    print_row(
        "ECE",
        &format!("{:.4}", report.calibration.expected_calibration_error()),
    );

    if detailed {
        ui::print_heading("Cases");
        for case in &report.cases {
            let mark = match case.relevance_correct {
                Some(true) => "✓".green(),
                Some(false) => "✗".red(),
                None => "!".yellow(),
            };
            let confidence = case
                .confidence
                .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"));
            ui::print_message(&format!(
                "  {mark} {}  {}  conf {confidence}",
                case.tender_id.bold(),
                status_label(case.status)
            ));
            if let Some(error) = &case.error {
                print_wrapped(error);
            }
        }
    }
}

/// Handle the `config` command
pub fn handle_config_command(config: &Config, save: bool) -> Result<()> {
    if save {
        let path = config.save()?;
        ui::print_success(&format!("Configuration saved to {}", path.display()));
        ui::print_newline();
    }

    let rendered = toml::to_string_pretty(&config.masked())?;
    ui::print_bordered_content(rendered.trim_end());
    Ok(())
}

/// Handle `kb add`
pub async fn handle_kb_add_command(config: &Config, args: KbAddArgs) -> Result<()> {
    let content = read_content(&args.content)?;
    let mut example = KnowledgeExample::new(args.title, args.category, content);
    example.metadata = parse_metadata(&args.meta)?;
    if let Some(id) = args.id {
        example = example.with_id(id);
    }

    let kb = open_knowledge_base(config)?;
    warn_if_ephemeral(config);
    let spinner = ui::create_spinner("Embedding document...");
    let id = kb.add_example(example).await;
    spinner.finish_and_clear();
    let id = id.context("Failed to add example")?;

    ui::print_success(&format!("Added {id} ({} documents total)", kb.count()));
    Ok(())
}

/// Handle `kb import`
pub async fn handle_kb_import_command(config: &Config, file: &Path) -> Result<()> {
    let kb = open_knowledge_base(config)?;
    warn_if_ephemeral(config);
    let spinner = ui::create_spinner(&format!("Importing {}...", file.display()));
    let imported = kb.import_json(file).await;
    spinner.finish_and_clear();
    let imported =
        imported.with_context(|| format!("Failed to import examples from {}", file.display()))?;

    ui::print_success(&format!(
        "Imported {imported} example(s); knowledge base now holds {}",
        kb.count()
    ));
    Ok(())
}

/// Handle `kb export`
pub fn handle_kb_export_command(config: &Config, file: &Path) -> Result<()> {
    let kb = open_knowledge_base(config)?;
    let exported = kb
        .export_json(file)
        .with_context(|| format!("Failed to export to {}", file.display()))?;
    ui::print_success(&format!("Exported {exported} example(s) to {}", file.display()));
    Ok(())
}

/// Handle `kb stats`
pub fn handle_kb_stats_command(config: &Config) -> Result<()> {
    let kb = open_knowledge_base(config)?;
    let stats = kb.statistics();

    ui::print_heading("Knowledge base");
    print_row("Documents", &stats.total_documents.to_string());
    print_row("Embeddings", &config.rag.embedding_model);
    match &config.rag.knowledge_base_path {
        Some(path) => print_row("Location", &path.display().to_string()),
        None => print_row("Location", "in-memory"),
    }
    for (category, count) in &stats.categories {
        print_row(category, &count.to_string());
    }
    Ok(())
}

/// Handle `kb search`
pub async fn handle_kb_search_command(
    config: &Config,
    query: &str,
    limit: usize,
    min_similarity: f64,
    category: Option<&str>,
    show_content: bool,
) -> Result<()> {
    let kb = open_knowledge_base(config)?;
    let spinner = ui::create_spinner("Searching...");
    let results = kb.search(query, limit, min_similarity, category).await;
    spinner.finish_and_clear();
    let results = results.context("Search failed")?;

    if results.is_empty() {
        ui::print_warning(&format!(
            "No examples with similarity >= {min_similarity:.2}"
        ));
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        ui::print_message(&format!(
            "{:>3}. {} [{}] {} {}",
            i + 1,
            result.title().unwrap_or("Untitled").bold(),
            result.category().unwrap_or("unknown"),
            format!("{:.3}", result.similarity).cyan(),
            result.id.dimmed()
        ));
        if show_content {
            print_wrapped(&result.content);
        }
    }
    Ok(())
}

/// Handle `kb list`
pub fn handle_kb_list_command(config: &Config, verbose: bool) -> Result<()> {
    let kb = open_knowledge_base(config)?;
    let examples = kb.list();
    if examples.is_empty() {
        ui::print_warning("Knowledge base is empty.");
        return Ok(());
    }

    for example in &examples {
        ui::print_message(&format!(
            "{}  {} [{}]",
            example.id.as_deref().unwrap_or("-").dimmed(),
            example.title.bold(),
            example.category
        ));
        if verbose {
            if !example.metadata.is_empty() {
                print_wrapped(&Value::Object(example.metadata.clone()).to_string());
            }
            let preview: String = example.content.chars().take(PREVIEW_CHARS).collect();
            print_wrapped(&preview);
        }
    }
    Ok(())
}

/// Handle `kb reset`
pub fn handle_kb_reset_command(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete the knowledge base without --yes");
    }
    let kb = open_knowledge_base(config)?;
    let removed = kb.count();
    kb.reset().context("Failed to reset knowledge base")?;
    ui::print_success(&format!("Removed {removed} document(s)"));
    Ok(())
}

fn warn_if_ephemeral(config: &Config) {
    if config.rag.knowledge_base_path.is_none() {
        ui::print_warning(
            "No knowledge base path configured; changes will not persist (use --kb-path).",
        );
    }
}
