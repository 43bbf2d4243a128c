use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use studyforge::api::Service;
use studyforge::config::StudyforgeConfig;
use studyforge::docstore::facade::{GeneratorFacade, StoreFacade};
use studyforge::docstore::http::HttpDocStore;
use studyforge::docstore::DocStore;
use studyforge::generate::client::AnthropicGenerator;
use studyforge::generate::{GenerationInvoker, TextGenerator};
use studyforge::limiter::{RetryPolicy, TokenBucket};
use studyforge::logging::init_logging;
use studyforge::pipeline::Pipeline;
use studyforge::queue::JobQueue;
use studyforge::stats::aggregate;
use studyforge::store::{SledStateStore, StateStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "studyforge", about = "Durable study-material generation pipeline")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker service until interrupted
    Serve,
    /// Print aggregate job and run statistics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = StudyforgeConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Status => status(config),
    }
}

async fn serve(config: StudyforgeConfig) -> anyhow::Result<()> {
    init_logging(&config.logging).context("failed to initialize logging")?;

    let store: Arc<dyn StateStore> = Arc::new(
        SledStateStore::open(&config.store.data_dir).context("failed to open state store")?,
    );

    let bucket = Arc::new(TokenBucket::new(
        config.docstore.rate_limit_per_sec,
        config.docstore.burst,
    ));
    let retry = RetryPolicy::new(&config.docstore.retry);

    let docstore: Arc<dyn DocStore> =
        Arc::new(HttpDocStore::new(&config.docstore).context("failed to build docstore client")?);
    let facade = Arc::new(StoreFacade::new(docstore, Arc::clone(&bucket), retry.clone()));

    let generator: Arc<dyn TextGenerator> = Arc::new(
        AnthropicGenerator::new(&config.generation)
            .context("failed to build generation client")?,
    );
    let generator_facade = GeneratorFacade::new(generator, Arc::clone(&bucket), retry);
    let invoker = GenerationInvoker::new(generator_facade, &config.generation);

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&facade),
        invoker,
        config.generation.clone(),
        config.docstore.clone(),
    ));
    let queue = Arc::new(JobQueue::new(
        Arc::clone(&store),
        pipeline,
        &config.worker,
    ));

    let recovered = queue
        .recover_interrupted()
        .context("failed to recover interrupted jobs")?;
    if recovered > 0 {
        info!(recovered, "interrupted jobs handled at startup");
    }

    // the service owns the trigger boundary; an HTTP layer would hold this
    let _service = Service::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&facade),
        config.trigger.shared_secret.clone(),
        config.generation.cost_per_token_usd,
    );

    queue.start();
    info!("studyforge serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    queue.stop().await;
    Ok(())
}

fn status(config: StudyforgeConfig) -> anyhow::Result<()> {
    let store =
        SledStateStore::open(&config.store.data_dir).context("failed to open state store")?;
    let jobs = store.jobs().context("failed to read jobs")?;
    let runs = store.runs().context("failed to read runs")?;
    let report = aggregate(&jobs, &runs, config.generation.cost_per_token_usd);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
