//! # CRM Insight CLI (`crmi`)
//!
//! Starts the HTTP server and runs the individual pipelines from the
//! command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crmi serve` | Start the HTTP server |
//! | `crmi ask "<question>"` | Answer a question with the tool-using agent |
//! | `crmi issue "<question>"` | Build a triage issue (JSON) |
//! | `crmi templates ...` | Generate three CRM messages |
//! | `crmi freshness` | Show the research corpus age and fallback decision |
//!
//! ## Examples
//!
//! ```bash
//! crmi serve --config ./config/crmi.toml
//! crmi ask "장바구니 이탈이 높은 이유는?"
//! crmi issue "장바구니 이탈이 높은 이유는?" --use-tools
//! crmi templates --business "패션 커머스" --funnel retention --tone 친근한 --insight "재구매 주기 45일"
//! ```

use chrono::Utc;
use clap::{Parser, Subcommand};
use crm_insight::config::{self, Config};
use crm_insight::models::TemplateRequest;
use crm_insight::server::{self, Services};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CRM Insight: retrieval-grounded research, issue triage, and CRM copy.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crmi.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "crmi", version, about = "CRM Insight — research answers, triage issues, and CRM copy")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crmi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Answer a question with the tool-using agent.
    Ask {
        question: String,
    },

    /// Build a triage issue and print it as JSON.
    ///
    /// Without `--use-tools` the question itself is the issue context.
    Issue {
        question: String,

        /// Ground the question with the agent first.
        #[arg(long)]
        use_tools: bool,
    },

    /// Generate three CRM messages with rationale.
    Templates {
        #[arg(long)]
        business: String,
        #[arg(long)]
        funnel: String,
        #[arg(long)]
        tone: String,
        #[arg(long)]
        insight: String,
    },

    /// Show the research corpus age and whether the secondary index would be consulted.
    Freshness,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { question } => {
            let services = Services::from_config(&cfg)?;
            let answer = services.answerer.answer(&question).await?;
            println!("{}", answer);
        }
        Commands::Issue {
            question,
            use_tools,
        } => {
            let services = Services::from_config(&cfg)?;
            let issue = services.issues.create_issue(&question, use_tools).await?;
            println!("{}", serde_json::to_string_pretty(&issue)?);
        }
        Commands::Templates {
            business,
            funnel,
            tone,
            insight,
        } => {
            let services = Services::from_config(&cfg)?;
            let request = TemplateRequest {
                business_desc: business,
                funnel_stage: funnel,
                tone,
                insight,
            };
            for (i, m) in services.templates.generate(&request).await?.iter().enumerate() {
                println!("{}. {}\n   {}", i + 1, m.copy, m.rationale);
            }
        }
        Commands::Freshness => {
            print_freshness(&cfg).await?;
        }
    }

    Ok(())
}

async fn print_freshness(cfg: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(cfg)?;
    let retriever = &services.retriever;
    let freshness = retriever.freshness().await;
    let policy = retriever.policy();
    let age = freshness.age_days(Utc::now(), policy.missing_age_days);

    match freshness.last_modified {
        Some(ts) => println!("newest {}: {} ({} days)", policy.document_suffix, ts.to_rfc3339(), age),
        None => println!("newest {}: none (treated as {} days)", policy.document_suffix, age),
    }
    println!(
        "threshold: {} days; secondary index {}",
        policy.threshold_days,
        if policy.needs_fallback(age, false) {
            "will be consulted"
        } else {
            "consulted only when the primary index has no hits"
        }
    );
    Ok(())
}
