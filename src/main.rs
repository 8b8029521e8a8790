//! Worker entry point.
//!
//! stdout is reserved for the event protocol; logs and panics go to stderr.
//! SIGINT turns into a single `cancelled` terminal event.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use transcribe_worker::backend::local::LocalBackend;
use transcribe_worker::backend::remote::{RemoteBackend, RemoteConfig};
use transcribe_worker::backend::TranscriptionBackend;
use transcribe_worker::error::WorkerError;
use transcribe_worker::events::EventEmitter;
use transcribe_worker::model_cache::default_models_dir;
use transcribe_worker::modes;
use transcribe_worker::notes::NotesGenerator;
use transcribe_worker::types::WorkItem;

#[derive(Parser)]
#[command(
    name = "transcribe-worker",
    about = "Audio transcription worker emitting line-delimited JSON events on stdout"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Local,
    Openai,
}

#[derive(Subcommand)]
enum Command {
    /// Transcribe one audio file
    Single {
        audio_file: PathBuf,
        #[arg(long, value_enum, default_value = "local")]
        backend: BackendKind,
        /// Model identifier; defaults to "base" locally, "whisper-1" remotely
        #[arg(long)]
        model: Option<String>,
        /// ISO language hint, autodetect when omitted
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        chunk_id: Option<String>,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, default_value = "")]
        api_key: String,
        #[arg(long)]
        models_dir: Option<PathBuf>,
        /// Also save the result JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Transcribe a list of chunks with per-chunk error isolation
    Batch {
        /// JSON array of {"file", "id"?} objects, or @path to a JSON file
        #[arg(long)]
        chunks: String,
        #[arg(long, default_value = "tiny")]
        model: String,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        models_dir: Option<PathBuf>,
    },
    /// Load a model and keep it resident until interrupted
    Warm {
        #[arg(long, default_value = "tiny")]
        model: String,
        #[arg(long)]
        models_dir: Option<PathBuf>,
    },
    /// Generate title and summary notes from a saved transcript
    Notes {
        transcript_file: PathBuf,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, default_value = "")]
        api_key: String,
        #[arg(long, default_value = "gpt-4o")]
        model: String,
        /// Also save the notes JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn local_backend(
    models_dir: Option<PathBuf>,
    model: String,
) -> Result<LocalBackend, WorkerError> {
    let models_dir = match models_dir {
        Some(dir) => dir,
        None => default_models_dir()?,
    };
    Ok(LocalBackend::new(models_dir, model))
}

async fn run(cli: Cli, emitter: &EventEmitter) -> Result<(), WorkerError> {
    match cli.command {
        Command::Single {
            audio_file,
            backend,
            model,
            language,
            chunk_id,
            api_key,
            models_dir,
            output,
        } => {
            let item = WorkItem {
                path: audio_file,
                chunk_id,
                language,
                model,
            };
            let mut backend: Box<dyn TranscriptionBackend> = match backend {
                BackendKind::Local => {
                    let model = item.model.clone().unwrap_or_else(|| "base".to_string());
                    Box::new(local_backend(models_dir, model)?)
                }
                BackendKind::Openai => {
                    let model = item.model.clone().unwrap_or_else(|| "whisper-1".to_string());
                    Box::new(RemoteBackend::new(RemoteConfig::new(model, api_key))?)
                }
            };
            modes::run_single(emitter, backend.as_mut(), &item, output.as_deref()).await
        }
        Command::Batch {
            chunks,
            model,
            language,
            models_dir,
        } => {
            let chunks = modes::parse_chunks(&chunks)?;
            let mut backend = local_backend(models_dir, model)?;
            modes::run_batch(emitter, &mut backend, &chunks, language.as_deref()).await
        }
        Command::Warm { model, models_dir } => {
            let mut backend = local_backend(models_dir, model)?;
            modes::run_warm(emitter, &mut backend).await
        }
        Command::Notes {
            transcript_file,
            api_key,
            model,
            output,
        } => {
            let generator = NotesGenerator::new(model, api_key)?;
            modes::run_notes(emitter, &generator, &transcript_file, output.as_deref()).await
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    std::panic::set_hook(Box::new(|info| {
        eprintln!("worker panic: {}", info);
    }));

    let cli = Cli::parse();
    let emitter = EventEmitter::new();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Warm mode owns its own shutdown signal; everything else races the
    // work against SIGINT so exactly one terminal event is emitted.
    let outcome = runtime.block_on(async {
        if matches!(cli.command, Command::Warm { .. }) {
            run(cli, &emitter).await
        } else {
            let work = run(cli, &emitter);
            tokio::pin!(work);
            tokio::select! {
                outcome = &mut work => outcome,
                _ = tokio::signal::ctrl_c() => {
                    Err(WorkerError::Interrupted("Cancelled by user".to_string()))
                }
            }
        }
    });

    // An interrupt can leave a whisper call running on the blocking pool.
    // Dropping the runtime normally joins that pool; shut down in the
    // background instead so the abandoned call does not delay exit.
    runtime.shutdown_background();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            emitter.emit(&e.to_event());
            ExitCode::FAILURE
        }
    }
}
