use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use trendbot::config::Settings;
use trendbot::feedback::{FeedbackLoop, FeedbackPaths};
use trendbot::llm::{backend_from_settings, Analyzer};
use trendbot::store::WeightsStore;

#[derive(Parser)]
#[command(version, about = "Offline scoring and weight feedback loop")]
struct Cli {
    /// Directory holding input.csv, results.jsonl and history.jsonl
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Score input.csv into results.jsonl
    Score,
    /// Label results interactively into history.jsonl
    Label,
    /// Ask the model to review recent labels
    Evaluate,
    /// Ask the model for new default weights
    Adjust,
    /// score, wait for review, label, evaluate, adjust
    Cycle,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trendbot=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    let backend = backend_from_settings(&settings.llm)?;
    let analyzer = Analyzer::new(backend, settings.llm.policy());
    let weights = Arc::new(WeightsStore::new(
        settings.storage.weights_path(),
        settings.storage.features_path(),
    ));
    let feedback = FeedbackLoop::new(analyzer, weights, FeedbackPaths::in_dir(&cli.dir));

    match cli.cmd {
        Cmd::Score => score(&feedback).await?,
        Cmd::Label => label(&feedback)?,
        Cmd::Evaluate => evaluate(&feedback).await?,
        Cmd::Adjust => adjust(&feedback).await?,
        Cmd::Cycle => {
            score(&feedback).await?;
            println!(
                "\nScores written. Review {} by hand, then press Enter to continue...",
                feedback.paths().results.display()
            );
            io::stdout().flush()?;
            io::stdin().lock().read_line(&mut String::new())?;
            if !feedback.paths().results.exists() {
                anyhow::bail!("{} is missing; run `score` first", feedback.paths().results.display());
            }
            label(&feedback)?;
            evaluate(&feedback).await?;
            adjust(&feedback).await?;
            println!("\nCycle complete.");
        }
    }

    Ok(())
}

async fn score(feedback: &FeedbackLoop) -> Result<()> {
    let rows = feedback.score().await.context("scoring inputs")?;
    println!("Saved {} scores to {}", rows, feedback.paths().results.display());
    Ok(())
}

fn label(feedback: &FeedbackLoop) -> Result<()> {
    let stdin = io::stdin();
    feedback
        .label(stdin.lock(), io::stdout())
        .context("labelling results")?;
    Ok(())
}

async fn evaluate(feedback: &FeedbackLoop) -> Result<()> {
    match feedback.evaluate().await.context("evaluating history")? {
        Some(review) => println!("Review:\n\n{}", review),
        None => println!("No labelled history to evaluate."),
    }
    Ok(())
}

async fn adjust(feedback: &FeedbackLoop) -> Result<()> {
    match feedback.adjust().await.context("adjusting weights")? {
        Some((reply, Some(weights))) => {
            println!("Model replied:\n{}\n", reply);
            println!("Saved {} new default weights.", weights.len());
        }
        Some((reply, None)) => {
            println!("Model replied:\n{}\n", reply);
            println!("Could not parse weights from the reply; nothing saved.");
        }
        None => println!("No labelled history to learn from."),
    }
    Ok(())
}
