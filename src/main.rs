//! # KB Harness CLI (`kbh`)
//!
//! The `kbh` binary provisions, inspects, queries, and removes a Bedrock
//! knowledge base backed by an OpenSearch Serverless vector collection.
//!
//! ## Usage
//!
//! ```bash
//! kbh --config ./config/kbh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbh init` | Write a commented default configuration file |
//! | `kbh provision` | Create policies, collection, index, knowledge base, data source; ingest |
//! | `kbh deprovision` | Delete everything `provision` creates, children first |
//! | `kbh status` | Show which resources exist and their status |
//! | `kbh ask "<prompt>"` | Answer a question from the knowledge base |
//! | `kbh invoke "<prompt>" --model <id>` | Prompt a foundation model directly |
//! | `kbh models` | List on-demand text models |
//! | `kbh completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Build the stack with defaults (demo-rag in us-east-1)
//! kbh provision
//!
//! # Ask with a specific model
//! kbh ask "What is our refund policy?" --model anthropic.claude-instant-v1
//!
//! # Verbose teardown
//! kbh deprovision -v
//! ```
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! optionally `AWS_SESSION_TOKEN`. Logs go to stderr; set `RUST_LOG` to
//! override the filter.

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use kb_harness::aws::AwsClient;
use kb_harness::config::{self, Config};
use kb_harness::{ask, deprovision, provision, status};

/// KB Harness CLI: provision and query a RAG knowledge base on AWS.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/kbh.toml` is used when present and built-in
/// defaults otherwise.
#[derive(Parser)]
#[command(
    name = "kbh",
    about = "KB Harness: provision and query a Bedrock knowledge base backed by OpenSearch Serverless",
    version,
    long_about = "KB Harness creates the OpenSearch Serverless security policies, vector collection, \
    and index a Bedrock knowledge base needs, creates the knowledge base and its S3 data source, \
    runs ingestion, and tears it all down again. Every step is idempotent."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbh.toml` when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a commented configuration file with every default.
    ///
    /// Writes to `--config` or `./config/kbh.toml`. Refuses to overwrite
    /// an existing file.
    Init,

    /// Create the knowledge base stack and ingest the bucket.
    ///
    /// Resolves the knowledge base role and source bucket, then creates
    /// (or reuses) the security policies, vector collection, index,
    /// knowledge base, and data source, and waits for an ingestion job to
    /// complete. Safe to re-run.
    Provision,

    /// Delete the knowledge base stack.
    ///
    /// Removes data sources, the knowledge base, the collection, and the
    /// security policies, in that order. Missing resources are skipped.
    Deprovision,

    /// Show which managed resources exist.
    ///
    /// Read-only: looks every resource up by its configured name.
    Status,

    /// Ask a question, answered from the knowledge base.
    Ask {
        /// The question.
        prompt: String,

        /// Generation model id. Defaults to `[models].default_model`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Prompt a foundation model directly, without retrieval.
    Invoke {
        /// The prompt.
        prompt: String,

        /// Model id, e.g. `amazon.titan-text-express-v1`.
        #[arg(long)]
        model: String,
    },

    /// List on-demand text foundation models.
    Models,

    /// Print shell completions to stdout.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    match &cli.command {
        Commands::Init => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
            config::write_default_config(&path)?;
            println!("Wrote {}", path.display());
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "kbh", &mut io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_or_default(cli.config.as_deref())?;
    let client = connect(&cfg)?;

    match cli.command {
        Commands::Provision => {
            provision::run_provision(&cfg, &client).await?;
        }
        Commands::Deprovision => {
            deprovision::run_deprovision(&cfg, &client).await?;
        }
        Commands::Status => {
            status::run_status(&cfg, &client).await?;
        }
        Commands::Ask { prompt, model } => {
            ask::run_ask(&cfg, &client, &client, &prompt, model.as_deref()).await?;
        }
        Commands::Invoke { prompt, model } => {
            ask::run_invoke(&client, &model, &prompt).await?;
        }
        Commands::Models => {
            ask::run_models(&client).await?;
        }
        Commands::Init | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn connect(cfg: &Config) -> anyhow::Result<AwsClient> {
    let client = AwsClient::from_config(&cfg.aws)?;
    tracing::debug!(region = client.region(), "AWS client ready");
    Ok(client)
}

/// Structured logs on stderr so stdout stays clean for command output.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "kb_harness=debug,kbh=debug"
    } else {
        "kb_harness=info,kbh=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .init();
}
