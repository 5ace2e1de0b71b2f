use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ouroboros_comment::cache::{start_auto_cleanup, MemoryCache};
use ouroboros_comment::remote::cli::API_KEY_ENV;
use ouroboros_comment::{
    ApiKey, CliRemoteCaller, CommentRequest, Orchestrator, OrchestratorConfig, Outcome,
    RequestContext, RequestMode,
};

#[derive(Parser)]
#[command(name = "ouroboros-comment")]
#[command(about = "Generate or update doc comments with an LLM backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a comment for a method, or update an existing one
    Generate {
        /// File with the (new) method source
        #[arg(long)]
        new_method: PathBuf,

        /// File with the method source before the change
        #[arg(long)]
        old_method: Option<PathBuf>,

        /// File with the comment to update
        #[arg(long)]
        old_comment: Option<PathBuf>,

        /// generate, update or rag
        #[arg(long, default_value = "generate")]
        mode: String,

        /// Model id (defaults to COMMENT_DEFAULT_MODEL)
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        request_id: Option<String>,

        /// Deadline in milliseconds (defaults to COMMENT_DEFAULT_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// LLM command-line client to run
        #[arg(long)]
        command: Option<PathBuf>,

        /// Tenant the cache entries belong to
        #[arg(long, default_value = "")]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ouroboros_comment=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            new_method,
            old_method,
            old_comment,
            mode,
            model,
            request_id,
            timeout_ms,
            command,
            tenant,
        } => {
            let mut request = CommentRequest::new(read_source(&new_method)?)
                .with_mode(mode.parse::<RequestMode>()?);
            request.old_method = old_method.as_deref().map(read_source).transpose()?;
            request.old_comment = old_comment.as_deref().map(read_source).transpose()?;
            request.model = model;
            request.request_id = request_id;
            request.timeout_ms = timeout_ms;

            let mut ctx = RequestContext::new(tenant);
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                ctx = ctx.with_credential(ApiKey::new(key));
            }

            let remote = match command {
                Some(path) => CliRemoteCaller::new(path).with_args(["--print"]),
                None => CliRemoteCaller::default(),
            };

            let outcome = run(request, ctx, remote).await?;
            println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
        }
    }

    Ok(())
}

async fn run(
    request: CommentRequest,
    ctx: RequestContext,
    remote: CliRemoteCaller,
) -> Result<Outcome> {
    let config = OrchestratorConfig::from_env()?;

    let cache = MemoryCache::new(config.cache.clone());
    let cleanup = tokio::spawn(start_auto_cleanup(cache.clone()));

    let orchestrator = Orchestrator::new(config, Arc::new(remote), Arc::new(cache))?;
    let handle = orchestrator.submit(request, ctx)?;
    let request_id = handle.request_id().to_string();

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling request {}", request_id);
            orchestrator.cancel(&request_id);
            handle.wait().await
        }
    };

    cleanup.abort();
    Ok(outcome)
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn outcome_json(outcome: &Outcome) -> serde_json::Value {
    match outcome {
        Outcome::Success(response) | Outcome::Cancelled(response) => json!({
            "outcome": outcome.kind(),
            "code": outcome.error_code().code(),
            "response": response,
        }),
        Outcome::TimedOut {
            request_id,
            elapsed_ms,
        } => json!({
            "outcome": outcome.kind(),
            "code": outcome.error_code().code(),
            "request_id": request_id,
            "elapsed_ms": elapsed_ms,
        }),
        Outcome::Failed(err) => json!({
            "outcome": outcome.kind(),
            "code": outcome.error_code().code(),
            "message": err.to_string(),
        }),
    }
}
