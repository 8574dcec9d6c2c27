use clap::{Parser, Subcommand};
use portico_index::answer::OpenRouterGenerator;
use portico_index::api::{
    ListJobsRequest, SearchRequest, SearchService, SubmitJobRequest,
};
use portico_index::corpus::JsonCorpusSource;
use portico_index::index::engine::{EngineConfig, IndexEngine};
use portico_index::index::jobs::DEFAULT_LIST_LIMIT;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// Admin CLI for the portico semantic index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory holding the .portico.db database and the data/ mirror
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Path to the corpus JSON tree (defaults to <base-dir>/corpus.json)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Disable the semantic tiers (keyword search only)
    #[arg(long)]
    no_embeddings: bool,

    /// Disable the ANN backend (dense fallback at build time)
    #[arg(long)]
    no_ann: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild the index as an asynchronous job and wait for it
    Build {
        /// Run the simulated job variant instead of a real build
        #[arg(long)]
        simulate: bool,
        /// Submit and exit without waiting for the job to finish
        #[arg(long)]
        detach: bool,
    },
    /// Search the index
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index and job status
    Status {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List recent build jobs, newest first
    Jobs {
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show one job in detail
    Job {
        id: String,
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },
    /// Pull current artifacts from the durable store into the local mirror
    Load,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let corpus_path = args
        .corpus
        .clone()
        .unwrap_or_else(|| args.base_dir.join("corpus.json"));
    let corpus = Arc::new(JsonCorpusSource::new(corpus_path));

    let mut config = EngineConfig::new(&args.base_dir);
    if args.no_embeddings {
        config = config.with_embedding(None);
    }
    if args.no_ann {
        config = config.with_ann(false);
    }

    let engine = Arc::new(IndexEngine::new(config, corpus).await?);
    let mut service = SearchService::new(Arc::clone(&engine));
    if let Some(generator) = OpenRouterGenerator::from_env() {
        service = service.with_generator(Arc::new(generator));
    }

    match args.command {
        Commands::Build { simulate, detach } => {
            let submitted = service.submit_job(SubmitJobRequest { simulate }).await?;
            println!("job {} submitted ({})", submitted.job_id, submitted.status);
            if detach {
                return Ok(());
            }

            loop {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let Some(record) = engine.job_status(&submitted.job_id).await? else {
                    continue;
                };
                if record.state.is_terminal() {
                    println!("job {} finished: {}", record.job_id, record.state);
                    if let Some(result) = &record.result {
                        println!(
                            "  documents: {}  backend: {}",
                            result.count,
                            result
                                .backend
                                .map(|b| b.to_string())
                                .unwrap_or_else(|| "none".to_string())
                        );
                        if let Some(note) = &result.note {
                            println!("  note: {note}");
                        }
                    }
                    if let Some(error) = &record.error {
                        println!("  error: {error}");
                    }
                    break;
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            format,
        } => {
            let response = service.search(SearchRequest { query, top_k }).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Summary => {
                    println!("{} hits for {:?}:", response.hits_count, response.query);
                    for source in &response.sources {
                        println!("  {} | {}", source.doc_id, source.title);
                    }
                    if !response.answer.is_empty() {
                        println!("\nanswer:\n{}", response.answer);
                    }
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            let status = engine.status().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                OutputFormat::Summary => {
                    println!("Portico Index Status");
                    println!("====================");
                    println!("  ANN available: {}", status.ann_available);
                    println!("  Embeddings available: {}", status.embeddings_available);
                    println!("  Artifact present: {}", status.artifact_found);
                    if let Some(backend) = status.backend {
                        println!("  Backend: {backend}");
                    }
                    println!("  Documents: {}", status.documents);
                    println!("  Jobs known to this process: {}", status.jobs.len());
                }
            }
            Ok(())
        }
        Commands::Jobs { limit, format } => {
            let listing = service.list_jobs(ListJobsRequest { limit }).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                }
                OutputFormat::Summary => {
                    println!("{} jobs:", listing.jobs.len());
                    for job in &listing.jobs {
                        println!(
                            "  {} | {} | created {}",
                            job.job_id, job.status, job.created_at
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Job { id, format } => {
            let job = service.job_detail(&id).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                }
                OutputFormat::Summary => {
                    println!("job {} | {}", job.job_id, job.status);
                    for line in &job.logs {
                        println!("  {} {}", line.ts, line.msg);
                    }
                }
            }
            Ok(())
        }
        Commands::Load => {
            let summary = engine.load().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}
