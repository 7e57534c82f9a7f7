use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use tracing::error;
use tracing_subscriber::EnvFilter;

use gust::bench::Benchmark;
use gust::config::{Config, LoadStrategy, UiTheme};
use gust::errors::EngineError;
use gust::output;
use gust::request::PreparedRequest;
use gust::ui::TermSink;
use gust::utils::parse_duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// HTTP load-generation tool.
#[derive(Parser, Debug)]
#[command(name = "gust", version, about)]
struct Args {
    /// Number of HTTP connections to keep open
    #[arg(short = 'c', long, default_value_t = 10)]
    connections: usize,

    /// Number of worker threads (standard driver)
    #[arg(short = 't', long, default_value_t = 2)]
    threads: usize,

    /// Duration of the test (e.g. 10s, 2m)
    #[arg(short = 'd', long, default_value = "10s", value_parser = parse_duration_arg)]
    duration: Duration,

    /// Total request ceiling (0 = unbounded)
    #[arg(short = 'n', long, default_value_t = 0)]
    requests: u64,

    /// Work rate in requests/sec across all connections (0 = unlimited)
    #[arg(short = 'R', long, default_value_t = 0)]
    rate: u32,

    /// Per-request timeout (e.g. 30s, 500ms)
    #[arg(long, default_value = "30s", value_parser = parse_duration_arg)]
    timeout: Duration,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// HTTP header to add to the request ("Name: Value"), repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// HTTP request body
    #[arg(long = "data")]
    body: Option<String>,

    /// Content-Type header shortcut
    #[arg(long)]
    content_type: Option<String>,

    /// Load strategy for multi-URL runs
    #[arg(long, default_value = "random")]
    load_strategy: LoadStrategy,

    /// Assertions: inline text or @file with one assertion per line
    #[arg(long)]
    asserts: Option<String>,

    /// Force the standard HTTP client instead of the event-loop driver
    #[arg(long = "std-client")]
    use_standard_driver: bool,

    /// Print latency distribution in the summary
    #[arg(long)]
    latency: bool,

    /// Render live progress while the test runs
    #[arg(long)]
    ui: bool,

    /// Live UI theme
    #[arg(long, default_value = "auto")]
    theme: UiTheme,

    /// Target URLs (scheme defaults to http://)
    #[arg(required = true)]
    urls: Vec<String>,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{}': expected 'Name: Value'", raw))?;

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| format!("invalid header name in '{}': {}", raw, e))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| format!("invalid header value in '{}': {}", raw, e))?;
    Ok((name, value))
}

fn build_requests(args: &Args) -> Result<Vec<PreparedRequest>, String> {
    let method: Method = args
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| format!("invalid HTTP method '{}'", args.method))?;

    let mut headers = HeaderMap::new();
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        headers.append(name, value);
    }
    if let Some(content_type) = &args.content_type {
        let value = HeaderValue::from_str(content_type)
            .map_err(|e| format!("invalid content type: {}", e))?;
        headers.insert(CONTENT_TYPE, value);
    }

    let body = args.body.clone().unwrap_or_default().into_bytes();

    args.urls
        .iter()
        .map(|raw| {
            let normalized = if raw.starts_with("http://") || raw.starts_with("https://") {
                raw.clone()
            } else {
                format!("http://{}", raw)
            };
            let url: Url = normalized
                .parse()
                .map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
            Ok(PreparedRequest::new(
                method.clone(),
                url,
                headers.clone(),
                body.clone(),
            ))
        })
        .collect()
}

fn load_asserts(arg: Option<&str>) -> Result<Option<String>, String> {
    match arg {
        None => Ok(None),
        Some(value) => {
            let text = match value.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read asserts file '{}': {}", path, e))?,
                None => value.to_string(),
            };
            Ok(Some(text))
        }
    }
}

async fn run(args: Args) -> Result<(), EngineError> {
    let requests =
        build_requests(&args).map_err(EngineError::InvalidConfig)?;
    let asserts_text =
        load_asserts(args.asserts.as_deref()).map_err(EngineError::InvalidConfig)?;

    let config = Config {
        connections: args.connections,
        threads: args.threads,
        duration: args.duration,
        requests: args.requests,
        rate: args.rate,
        timeout: args.timeout,
        load_strategy: args.load_strategy,
        use_standard_driver: args.use_standard_driver,
        asserts_text,
        live_ui: args.ui,
        ui_theme: args.theme,
    };

    println!(
        "Running {:?} test @ {}",
        config.duration,
        requests
            .iter()
            .map(|r| r.url.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  {} threads and {} connections",
        config.threads, config.connections
    );

    let mut benchmark = Benchmark::with_requests(config.clone(), requests);
    if config.live_ui {
        benchmark = benchmark.with_sink(Arc::new(TermSink::new(config.ui_theme)));
    }

    let results = benchmark.run().await?;
    if config.live_ui {
        // Move past the live status line before printing the summary.
        eprintln!();
    }
    output::print_results(&results, args.latency);

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
