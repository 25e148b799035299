//! CLI command handlers.
//!
//! Each `run_*` function performs one command against the configured
//! database and model, printing plain text (or pretty JSON with `--json`)
//! to stdout. Failures are returned with every reason listed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use socratic_harness_core::error::PipelineError;
use socratic_harness_core::models::{MisconceptionPattern, SourceFile};

use crate::config::Config;
use crate::db;
use crate::extract::load_source_file;
use crate::model::create_model;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::sqlite_store::SqliteStore;

/// Build a [`Pipeline`] over the configured SQLite database and model.
pub async fn open_pipeline(config: &Config) -> Result<Pipeline> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let model = create_model(&config.model)?;
    Ok(Pipeline::new(store, model, PipelineSettings::from(config)))
}

/// Convert a pipeline failure into an error listing all of its reasons.
pub fn failure(err: PipelineError) -> anyhow::Error {
    let kind = match &err {
        PipelineError::Input { .. } => "invalid input",
        PipelineError::Precondition(_) => "precondition failed",
        PipelineError::Capability { .. } => "model capability failed",
        PipelineError::Generation { .. } => "generation failed",
        PipelineError::Store(_) => "storage error",
    };
    let reasons: Vec<String> = err.reasons().iter().map(|r| format!("  - {}", r)).collect();
    anyhow::anyhow!("{}:\n{}", kind, reasons.join("\n"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_document_add(
    config: &Config,
    title: &str,
    paths: &[PathBuf],
    json: bool,
) -> Result<()> {
    let files: Vec<SourceFile> = paths
        .iter()
        .map(|p| load_source_file(p))
        .collect::<Result<_>>()?;

    let pipeline = open_pipeline(config).await?;
    let document = pipeline.create_document(title).await.map_err(failure)?;
    eprintln!("Created document {} ({})", document.id, document.title);

    let report = pipeline
        .index_document(&document.id, &files)
        .await
        .map_err(failure)
        .with_context(|| format!("indexing document {} failed", document.id))?;

    if json {
        return print_json(&report);
    }
    println!(
        "Indexed {} file(s) into {} chunk(s) for document {}",
        report.files_seen, report.chunks_created, report.document_id
    );
    for err in &report.errors {
        println!("  warning: {}", err);
    }
    Ok(())
}

pub async fn run_document_show(config: &Config, id: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let overview = pipeline.document(id).await.map_err(failure)?;
    if json {
        return print_json(&overview);
    }

    let doc = &overview.document;
    println!("{}  {}", doc.id, doc.title);
    println!("  status:         {}", doc.status.as_str());
    println!("  created:        {}", doc.created_at.to_rfc3339());
    println!("  chunks:         {}", overview.chunks);
    println!(
        "  summary:        {}",
        if overview.summary.is_some() { "yes" } else { "no" }
    );
    println!("  rubrics:        {}", overview.rubrics.len());
    for rubric in &overview.rubrics {
        println!("    - {}", rubric.concept);
    }
    println!("  misconceptions: {}", overview.misconceptions.len());
    Ok(())
}

pub async fn run_summarize(config: &Config, document_id: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let report = pipeline.summarize(document_id).await.map_err(failure)?;
    if json {
        return print_json(&report);
    }
    println!("{}", report.summary.content);
    eprintln!("(summary built from {} chunk(s))", report.chunks_used);
    Ok(())
}

pub async fn run_rubrics_generate(config: &Config, document_id: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let report = pipeline
        .generate_rubrics(document_id)
        .await
        .map_err(failure)?;
    if json {
        return print_json(&report);
    }
    if report.summary_generated {
        println!("Generated a summary first.");
    }
    println!(
        "Created {} rubric(s) from {} concept(s):",
        report.rubrics.len(),
        report.concepts_extracted
    );
    for rubric in &report.rubrics {
        println!("  - {} ({})", rubric.concept, rubric.id);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

pub async fn run_rubrics_list(config: &Config, document_id: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let rubrics = pipeline.rubrics(document_id).await.map_err(failure)?;
    if json {
        return print_json(&rubrics);
    }
    if rubrics.is_empty() {
        println!("No rubrics defined.");
        return Ok(());
    }
    for rubric in &rubrics {
        println!("{}  {}", rubric.id, rubric.concept);
        for (level, description) in rubric.levels.iter() {
            println!("  {:<11} {}", level, description);
        }
    }
    Ok(())
}

pub async fn run_misconception_add(
    config: &Config,
    document_id: &str,
    concept: &str,
    name: &str,
    signals: Vec<String>,
    followups: Vec<String>,
) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let pattern = MisconceptionPattern::new(document_id, concept, name, signals, followups);
    let id = pattern.id.clone();
    pipeline.add_misconception(pattern).await.map_err(failure)?;
    println!("Added misconception pattern {}", id);
    Ok(())
}

pub async fn run_conversation_start(config: &Config, document_id: &str) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let conversation = pipeline
        .start_conversation(document_id)
        .await
        .map_err(failure)?;
    println!("{}", conversation.id);
    Ok(())
}

pub async fn run_say(config: &Config, conversation_id: &str, text: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let reply = pipeline.say(conversation_id, text).await.map_err(failure)?;
    if json {
        return print_json(&reply);
    }
    println!("{}", reply.content);
    match &reply.turn {
        Some(turn) => eprintln!(
            "(confidence {:.2}, {} chunk(s), rubrics: {})",
            turn.confidence,
            turn.chunks_used,
            if turn.rubrics_used.is_empty() {
                "none".to_string()
            } else {
                turn.rubrics_used.join(", ")
            }
        ),
        None => {
            for reason in &reply.reasons {
                eprintln!("  error: {}", reason);
            }
        }
    }
    Ok(())
}

pub async fn run_evaluate(
    config: &Config,
    conversation_id: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    if force {
        pipeline
            .reset_evaluation(conversation_id)
            .await
            .map_err(failure)?;
    }
    let outcome = pipeline.evaluate(conversation_id).await.map_err(failure)?;
    if json {
        return print_json(&outcome);
    }

    let report = &outcome.report;
    println!(
        "Overall: {:.3} ({})",
        report.overall_score,
        report.performance_level()
    );
    for (concept, score) in &report.detailed_scores {
        println!("  {:<30} {:.2}  {}", concept, score.score, score.level);
    }
    println!();
    println!("{}", report.feedback);
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }
    let matched = &outcome.analysis.misconceptions.matched;
    if !matched.is_empty() {
        println!();
        println!("Misconceptions:");
        for m in matched {
            println!("  - {} ({}): \"{}\"", m.name, m.concept, m.excerpt);
            if let Some(followup) = &m.suggested_followup {
                println!("    ask: {}", followup);
            }
        }
    }
    if report.needs_attention() {
        println!();
        println!("This learner needs attention.");
    }
    for warning in &outcome.warnings {
        eprintln!("  warning: {}", warning);
    }
    Ok(())
}

pub async fn run_retrieve(config: &Config, document_id: &str, query: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let context = pipeline.retrieve(document_id, query).await.map_err(failure)?;

    if json {
        let chunks: Vec<_> = context
            .chunks
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.chunk.id,
                    "source": m.chunk.source,
                    "sequence": m.chunk.sequence,
                    "distance": m.distance,
                    "text": m.chunk.text,
                })
            })
            .collect();
        return print_json(&serde_json::json!({
            "chunks": chunks,
            "rubrics": context.rubrics,
        }));
    }

    if context.chunks.is_empty() {
        println!("No chunks found.");
    }
    for (i, m) in context.chunks.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{}",
            i + 1,
            m.distance,
            m.chunk.source,
            m.chunk.ordinal
        );
        println!("   {}", m.chunk.text.replace('\n', " "));
    }
    for ranked in &context.rubrics {
        println!("rubric: {} (overlap {})", ranked.rubric.concept, ranked.overlap);
    }
    Ok(())
}
