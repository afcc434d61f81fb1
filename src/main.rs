use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use unreal_source_query::config::load_config;
use unreal_source_query::engine::{tool_schema, HybridQueryEngine, QueryOptions};
use unreal_source_query::filter::parse_filter;
use unreal_source_query::format::{format_result, OutputFormat};
use unreal_source_query::models::Scope;
use unreal_source_query::server;
use unreal_source_query::store::MetadataStore;

/// Exit code for a valid run that found nothing.
const EXIT_NO_RESULTS: u8 = 2;

#[derive(Parser)]
#[command(
    name = "ueq",
    about = "Hybrid code search for Unreal Engine 5 source trees",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ueq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the metadata store schema
    Init,

    /// Search the index
    Search {
        /// The query (e.g. "FHitResult", "how does collision detection work")
        question: String,

        /// Number of results to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Search scope: engine, project, or all
        #[arg(long, default_value = "engine")]
        scope: String,

        /// Output format: text, json, jsonl, xml, markdown, code, or path
        #[arg(long, default_value = "text")]
        format: String,

        /// Omit definition code from the output
        #[arg(long)]
        no_code: bool,

        /// Maximum lines per code snippet
        #[arg(long, default_value_t = 40)]
        max_lines: usize,

        /// Relational filter, e.g. "type:struct AND macro:uproperty"
        #[arg(long)]
        filter: Option<String>,

        /// Enable cross-encoder re-ranking (slower, higher precision)
        #[arg(long)]
        use_reranker: bool,

        /// Print the query analysis before the results
        #[arg(long)]
        show_reasoning: bool,

        /// Override the embedding model for this query
        #[arg(long)]
        model: Option<String>,
    },

    /// Print the machine-readable tool schema and exit
    Describe,

    /// Start the HTTP search server
    Serve,

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries only results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Init => {
            let config = load_config(&cli.config)?;
            let store = MetadataStore::create(&config.index.metadata).await?;
            store.close().await;
            println!("Metadata store initialized at {}", config.index.metadata.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Describe => {
            println!("{}", serde_json::to_string_pretty(&tool_schema())?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "ueq", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve => {
            let config = load_config(&cli.config)?;
            let engine = Arc::new(HybridQueryEngine::open(config).await?);
            server::run_server(engine).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Search {
            question,
            top_k,
            scope,
            format,
            no_code,
            max_lines,
            filter,
            use_reranker,
            show_reasoning,
            model,
        } => {
            let format: OutputFormat = format.parse().map_err(anyhow::Error::msg)?;
            let scope: Scope = scope.parse().map_err(anyhow::Error::msg)?;

            let config = load_config(&cli.config)?;
            let engine = HybridQueryEngine::open(config).await?;

            let mut options = QueryOptions::new(question);
            options.top_k = top_k;
            options.scope = scope;
            options.use_reranker = use_reranker;
            options.model = model;
            if let Some(expr) = &filter {
                options.filters = parse_filter(expr)?;
            }

            let result = match engine.query(&options).await {
                Ok(result) => result,
                Err(e) => {
                    // Machine formats get a machine-readable error on stdout.
                    if matches!(format, OutputFormat::Json | OutputFormat::Jsonl) {
                        println!(
                            "{}",
                            serde_json::json!({ "error": e.to_string(), "status": "error" })
                        );
                    }
                    return Err(e.into());
                }
            };

            if show_reasoning {
                eprintln!("=== Query Analysis ===");
                eprintln!("Type: {}", result.intent.query_type);
                if let Some(name) = &result.intent.entity_name {
                    let kind = result
                        .intent
                        .entity_type
                        .map(|k| k.as_str())
                        .unwrap_or("unknown");
                    eprintln!("Entity: {kind} {name}");
                }
                eprintln!("Confidence: {:.2}", result.intent.confidence);
                eprintln!("Reasoning: {}", result.intent.reasoning);
                if result.intent.expanded_terms.len() > 1 {
                    eprintln!("Expanded: {:?}", result.intent.expanded_terms);
                }
                eprintln!();
            }

            print!("{}", format_result(&result, format, !no_code, max_lines)?);

            if result.has_results() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_NO_RESULTS))
            }
        }
    }
}
