use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use aisdk::config::{load_config, AppConfig};
use aisdk::error::{Error, StreamError};
use aisdk::observability::token_counter::StreamTally;
use aisdk::observability::{init_tracing, log_stream_complete};
use aisdk::protocol::canonical::{ToolCall, ToolCallResult};
use aisdk::protocol::{adapt_sse, Provider};
use aisdk::stream::{
    pipe, sse_event_stream, DataStream, DataStreamAccumulator, DataStreamExt, DataStreamPart,
};
use bytes::Bytes;
use clap::Parser;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::AsyncReadExt;

/// Replay a captured provider SSE stream as an AI SDK data stream on stdout.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Provider that produced the capture (openai, anthropic or google)
    provider: Provider,

    /// SSE capture file, or `-` for stdin
    capture: PathBuf,

    /// Configuration file; a missing file means defaults
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Print the accumulated messages as JSON on stderr when done
    #[arg(long)]
    dump_messages: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.features.log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "replay failed");
            eprintln!("aisdk-replay: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), Error> {
    let start = Instant::now();
    if config.providers.api_key(cli.provider).is_none() {
        tracing::debug!(provider = %cli.provider, "no API key configured; replaying offline");
    }

    let body = read_capture(&cli.capture).await.map_err(StreamError::from)?;
    tracing::info!(
        provider = %cli.provider,
        bytes = body.len(),
        "replaying capture"
    );
    let events = sse_event_stream(futures_util::stream::iter([Ok::<_, Infallible>(
        Bytes::from(body),
    )]));

    let mut parts = adapt_sse(cli.provider, events);
    if config.features.tool_echo {
        parts = parts.with_tool_calling(echo_args).into_data_stream();
    }

    let mut tally = StreamTally::new();
    let mut accumulator = DataStreamAccumulator::new();
    let mut stdout = tokio::io::stdout();
    pipe(observe(parts, &mut tally, &mut accumulator), &mut stdout).await?;

    log_stream_complete(
        cli.provider,
        accumulator.finish_reason(),
        accumulator.usage(),
        &tally,
        start,
    );
    if cli.dump_messages {
        let json = serde_json::to_string_pretty(accumulator.messages())
            .map_err(StreamError::from)?;
        eprintln!("{json}");
    }
    Ok(())
}

/// Tally and accumulate parts while forwarding all of them, error parts included.
fn observe<'a>(
    parts: DataStream,
    tally: &'a mut StreamTally,
    accumulator: &'a mut DataStreamAccumulator,
) -> impl Stream<Item = Result<DataStreamPart, StreamError>> + 'a {
    parts.inspect(move |part| {
        if let Ok(part) = part {
            tally.observe(part);
            if let Err(err) = accumulator.push(part) {
                tracing::warn!(error = %err, "accumulator rejected part");
            }
        }
    })
}

fn echo_args(call: ToolCall) -> ToolCallResult {
    ToolCallResult::from(Value::Object(call.args))
}

async fn read_capture(path: &Path) -> std::io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut body = Vec::new();
        tokio::io::stdin().read_to_end(&mut body).await?;
        return Ok(body);
    }
    tokio::fs::read(path).await
}
