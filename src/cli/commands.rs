use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::AsyncConfig;
use crate::deferred::DeferredResult;
use crate::error::AsyncError;
use crate::manager::{AsyncManager, CyclePhase};
use crate::request::StandardAsyncRequest;
use crate::task::AsyncTask;

/// Command-line interface for the webasync demo
#[derive(Parser)]
#[command(name = "webasync-demo")]
#[command(about = "Drive requests through the async coordinator", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one request through an async cycle and print the dispatched result
    Run {
        /// Processing mode
        #[arg(long, value_enum, default_value_t = Mode::Callable)]
        mode: Mode,

        /// How long the work (or the external producer) takes
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,

        /// Request timeout; unset means the configured default
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Make the work fail instead of producing a value
        #[arg(long, default_value_t = false)]
        fail: bool,

        /// YAML configuration file (default: WEBASYNC_* environment)
        #[arg(long, env = "WEBASYNC_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    Config {
        /// YAML configuration file (default: WEBASYNC_* environment)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Submit the work to the configured executor
    Callable,
    /// Fulfil a deferred result from a producer thread
    Deferred,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Callable => "callable",
            Mode::Deferred => "deferred",
        }
    }
}

/// Parameters of one demo run.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub mode: Mode,
    pub delay_ms: u64,
    pub timeout_ms: Option<u64>,
    pub fail: bool,
}

/// What the dispatch thread saw for a demo request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemoReport {
    pub request_id: String,
    pub uri: String,
    pub phase: CyclePhase,
    pub result: Value,
    pub error: Option<String>,
    pub context: Vec<Value>,
}

/// Execute a parsed command line.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            mode,
            delay_ms,
            timeout_ms,
            fail,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let options = DemoOptions {
                mode,
                delay_ms,
                timeout_ms,
                fail,
            };
            let report = run_demo(&config, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Config { file } => {
            let config = load_config(file.as_ref())?;
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AsyncConfig> {
    match path {
        Some(path) => AsyncConfig::load(path),
        None => Ok(AsyncConfig::from_env()),
    }
}

/// Drive one request through a full cycle and wait for its dispatch.
pub fn run_demo(config: &AsyncConfig, options: &DemoOptions) -> Result<DemoReport> {
    let mut manager = AsyncManager::new(config.build_defaults());
    let (request, dispatched) = StandardAsyncRequest::new(format!("/demo/{}", options.mode.as_str()));
    manager.configure_request(Arc::clone(&request) as Arc<dyn crate::request::AsyncWebRequest>)?;

    let delay_ms = options.delay_ms;
    let fail = options.fail;
    let context = [json!({ "mode": options.mode.as_str(), "delay_ms": delay_ms })];

    match options.mode {
        Mode::Callable => {
            let mut task = AsyncTask::new(move || {
                may::coroutine::sleep(Duration::from_millis(delay_ms));
                if fail {
                    Err(AsyncError::failed("demo work failed"))
                } else {
                    Ok(json!({ "produced_by": "executor", "delay_ms": delay_ms }))
                }
            })
            .with_label("demo");
            if let Some(timeout_ms) = options.timeout_ms {
                task = task.with_timeout(timeout_ms);
            }
            manager.start_callable_processing(task, &context)?;
        }
        Mode::Deferred => {
            let mut deferred = DeferredResult::new();
            if let Some(timeout_ms) = options.timeout_ms {
                deferred = deferred.with_timeout(timeout_ms);
            }
            manager.start_deferred_result_processing(&deferred, &context)?;

            let producer = deferred.clone();
            std::thread::Builder::new()
                .name("demo-producer".to_string())
                .spawn(move || {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    let accepted = if fail {
                        producer.set_error_result(AsyncError::failed("demo producer failed"))
                    } else {
                        producer.set_result(json!({ "produced_by": "producer", "delay_ms": delay_ms }))
                    };
                    info!(accepted, "Demo producer finished");
                })
                .context("Failed to spawn demo producer")?;
        }
    }
    info!(mode = options.mode.as_str(), "Async cycle started; request thread released");

    let wait = Duration::from_millis(delay_ms + options.timeout_ms.unwrap_or(0) + 5_000);
    let signal = dispatched
        .recv_timeout(wait)
        .map_err(|_| anyhow!("request was not dispatched within {wait:?}"))?;

    let phase = manager.cycle_phase();
    let outcome = manager
        .concurrent_result()
        .context("request dispatched without a committed result")?;
    let context = manager.concurrent_result_context().into_vec();
    request.complete();
    manager.clear_concurrent_result();

    let (result, error) = match outcome {
        Ok(value) => (value, None),
        Err(e) => (Value::Null, Some(e.to_string())),
    };
    Ok(DemoReport {
        request_id: signal.request_id.to_string(),
        uri: signal.uri,
        phase,
        result,
        error,
        context,
    })
}
