use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    AnswerComposer, CharacterNgramEmbedder, DecodingMethod, EmbeddingClient,
    EmbeddingEndpointConfig, FileVectorIndex, GenerationParams, IngestionOptions,
    IngestionPipeline, LanguageModel, LopdfExtractor, OllamaEmbeddingClient,
    OllamaGenerateClient, OllamaGenerateConfig, QueryEngine, Retriever, WatsonxClient,
    WatsonxConfig, DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_K, DEFAULT_WATSONX_MODEL,
    DEFAULT_WATSONX_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector index
    #[arg(long, env = "VECTOR_DB", default_value = "./vector_db", global = true)]
    vector_db: PathBuf,

    /// Which embedding backend to use
    #[arg(long, env = "EMBEDDER", value_enum, default_value_t = EmbedderKind::Ollama, global = true)]
    embedder: EmbedderKind,

    /// Base URL of the inference server that serves embeddings
    #[arg(long, env = "INFERENCE_SERVER_URL", default_value = "http://localhost:11434", global = true)]
    inference_server_url: String,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL, global = true)]
    embedding_model: String,

    /// Embedding request timeout in seconds
    #[arg(long, env = "EMBEDDING_TIMEOUT_SECS", default_value = "60", global = true)]
    embedding_timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Remote model behind an Ollama-compatible endpoint.
    Ollama,
    /// Local hashed character trigrams; needs no server.
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum LlmProvider {
    Watsonx,
    Ollama,
}

#[derive(Clone, Copy, ValueEnum)]
enum Decoding {
    Sample,
    Greedy,
}

#[derive(clap::Args)]
struct LlmArgs {
    /// Language-model provider
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value_t = LlmProvider::Watsonx)]
    llm_provider: LlmProvider,

    /// Language-model identifier
    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_WATSONX_MODEL)]
    llm_model: String,

    /// Base URL of an Ollama-compatible generation server
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://localhost:11434")]
    llm_base_url: String,

    /// watsonx.ai regional endpoint
    #[arg(long, env = "WATSONX_URL", default_value = DEFAULT_WATSONX_URL)]
    watsonx_url: String,

    /// IBM Cloud API key used for the IAM token exchange
    #[arg(long, env = "WATSONX_API_KEY", default_value = "", hide_env_values = true)]
    watsonx_api_key: String,

    /// watsonx.ai project id
    #[arg(long, env = "PROJECT_ID", default_value = "")]
    project_id: String,

    /// Maximum number of generated tokens
    #[arg(long, env = "LLM_MAX_NEW_TOKENS", default_value = "512")]
    max_new_tokens: u32,

    /// Sampling temperature
    #[arg(long, env = "LLM_TEMPERATURE", default_value = "0.2")]
    temperature: f32,

    /// Decoding strategy
    #[arg(long, env = "LLM_DECODING", value_enum, default_value_t = Decoding::Sample)]
    decoding: Decoding,

    /// Generation request timeout in seconds
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value = "120")]
    llm_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the vector index from a folder of PDFs.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long, env = "DATA_FOLDER", default_value = "./data")]
        folder: PathBuf,
        /// Target characters per chunk.
        #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
        chunk_size: usize,
        /// Characters repeated between consecutive chunks.
        #[arg(long, env = "CHUNK_OVERLAP", default_value = "150")]
        chunk_overlap: usize,
        /// Chunks sent per embedding request.
        #[arg(long, env = "EMBED_BATCH_SIZE", default_value = "32")]
        embed_batch_size: usize,
    },
    /// Answer one question with citations.
    Ask {
        /// The question
        #[arg(long)]
        query: String,
        /// Number of passages used as context.
        #[arg(long, env = "TOP_K", default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Read questions from stdin, one per line, until EOF or `exit`.
    Chat {
        /// Number of passages used as context.
        #[arg(long, env = "TOP_K", default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Send a handshake prompt to the language model.
    Check {
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Show what the persisted index contains.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let embedder = build_embedder(&cli)?;

    match cli.command {
        Command::Ingest {
            ref folder,
            chunk_size,
            chunk_overlap,
            embed_batch_size,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
                embed_batch_size,
            };
            let index = Arc::new(FileVectorIndex::open(&cli.vector_db, embedder.model()).await?);
            let pipeline =
                IngestionPipeline::new(Arc::new(LopdfExtractor), embedder, index, &options)?;

            info!(folder = %folder.display(), index = %cli.vector_db.display(), "ingesting pdfs");
            let report = pipeline.ingest(folder).await?;

            println!("documents processed: {}", report.documents_processed);
            println!("documents failed:    {}", report.documents_failed());
            for skipped in &report.skipped_files {
                println!("  - {}: {}", skipped.path.display(), skipped.reason);
            }
            println!("chunks produced:     {}", report.chunks_produced);
            if report.index_rewritten {
                println!("index written to {} at {}", cli.vector_db.display(), Utc::now().to_rfc3339());
            } else {
                println!("index left unchanged (no chunks were produced)");
            }
        }
        Command::Ask {
            ref query,
            top_k,
            ref llm,
        } => {
            let (engine, _) = build_engine(&cli, embedder, llm, top_k).await?;
            println!("{}", engine.respond(query).await);
        }
        Command::Chat { top_k, ref llm } => {
            let (engine, index) = build_engine(&cli, embedder, llm, top_k).await?;
            chat(&engine, &index).await?;
        }
        Command::Check { ref llm } => {
            let model = build_language_model(llm)?;
            match model.generate("State your status.").await {
                Ok(reply) => println!("language model response: {}", reply.trim()),
                Err(error) => {
                    println!("connection error: {error}");
                    anyhow::bail!("language model handshake failed");
                }
            }
        }
        Command::Stats => {
            let index = FileVectorIndex::open(&cli.vector_db, embedder.model()).await?;
            match index.manifest().await {
                Some(manifest) => {
                    println!("location:   {}", index.snapshot_path().display());
                    println!("generation: {}", manifest.generation);
                    println!("built at:   {}", manifest.built_at.to_rfc3339());
                    println!("model:      {}", manifest.model);
                    println!("dimensions: {}", manifest.dimensions);
                    println!("entries:    {}", manifest.entry_count);
                    println!("documents:  {}", manifest.sources.len());
                    for source in &manifest.sources {
                        println!("  - {source}");
                    }
                }
                None => println!("no index at {}; run ingest first", cli.vector_db.display()),
            }
        }
    }

    Ok(())
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingClient>> {
    Ok(match cli.embedder {
        EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        EmbedderKind::Ollama => Arc::new(OllamaEmbeddingClient::new(EmbeddingEndpointConfig {
            base_url: cli.inference_server_url.clone(),
            model: cli.embedding_model.clone(),
            timeout: Duration::from_secs(cli.embedding_timeout_secs),
        })?),
    })
}

fn build_language_model(args: &LlmArgs) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let params = GenerationParams {
        max_new_tokens: args.max_new_tokens,
        temperature: args.temperature,
        decoding: match args.decoding {
            Decoding::Sample => DecodingMethod::Sample,
            Decoding::Greedy => DecodingMethod::Greedy,
        },
    };
    let timeout = Duration::from_secs(args.llm_timeout_secs);

    Ok(match args.llm_provider {
        LlmProvider::Watsonx => Arc::new(WatsonxClient::new(WatsonxConfig {
            url: args.watsonx_url.clone(),
            api_key: args.watsonx_api_key.clone(),
            project_id: args.project_id.clone(),
            model_id: args.llm_model.clone(),
            params,
            timeout,
        })?),
        LlmProvider::Ollama => Arc::new(OllamaGenerateClient::new(OllamaGenerateConfig {
            base_url: args.llm_base_url.clone(),
            model: args.llm_model.clone(),
            params,
            timeout,
        })?),
    })
}

async fn build_engine(
    cli: &Cli,
    embedder: Arc<dyn EmbeddingClient>,
    llm: &LlmArgs,
    top_k: usize,
) -> anyhow::Result<(QueryEngine, Arc<FileVectorIndex>)> {
    let index = Arc::new(FileVectorIndex::open(&cli.vector_db, embedder.model()).await?);
    if index.manifest().await.is_none() {
        warn!(index = %cli.vector_db.display(), "vector index not found; answers will report an empty index");
    }

    let retriever = Retriever::new(embedder, index.clone()).with_default_k(top_k)?;
    let composer = AnswerComposer::new(build_language_model(llm)?);
    Ok((QueryEngine::new(retriever, composer), index))
}

/// Interactive loop. Picks up a rebuild made by a concurrent `ingest`
/// before each question.
async fn chat(engine: &QueryEngine, index: &FileVectorIndex) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        if let Err(error) = index.reload_if_changed().await {
            warn!(%error, "could not reload the vector index; answering from the loaded snapshot");
        }

        let response = engine.respond(question).await;
        stdout.write_all(format!("{response}\n\n").as_bytes()).await?;
    }

    Ok(())
}
