use anyhow::Context;
use clap::{Parser, ValueEnum};
use crash_signature::{parse_crashid, CrashData, SignatureGenerator, SignatureLists};
use fetch::FetchError;
use futures_util::stream::{FuturesUnordered, StreamExt};
use progress::Progress;
use report::Row;
use status::Status;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime;

mod config;
mod fetch;
mod progress;
mod report;
mod status;

const DEFAULT_CONFIG_FILE: &str = "siggen.toml";

fn existing_path(s: &str) -> std::io::Result<PathBuf> {
    let p = PathBuf::from(s);
    if !std::fs::exists(&p)? {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file does not exist",
        ))
    } else {
        Ok(p)
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Csv,
    Markdown,
}

/// Crash signature regeneration.
///
/// Fetches processed crashes from a crash-stats API, regenerates each
/// signature with the local ruleset, and reports the old and new signatures
/// side by side. Crash ids (bare, `bp-` prefixed, or report URLs) are taken
/// from the command line, or from stdin when none are given.
#[derive(Debug, Parser)]
struct Args {
    /// The path to the config file. If unspecified, uses `siggen.toml` (if
    /// it exists).
    #[arg(short, long, value_parser = existing_path)]
    config_file: Option<PathBuf>,

    /// The crash-stats API host.
    #[arg(long)]
    host: Option<String>,

    /// The API token to send in the Auth-Token header. Overrides the
    /// config file.
    #[arg(long)]
    api_token: Option<String>,

    /// Directory with signature list files to use instead of the bundled
    /// lists.
    #[arg(long, value_parser = existing_path)]
    siglists: Option<PathBuf>,

    /// The output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print generation notes and the debug log with each crash.
    #[arg(short, long)]
    verbose: bool,

    /// The path to which to write the report. If unspecified, output is
    /// written to stdout.
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Disable progress display on stderr.
    #[arg(short = 'q', long)]
    no_progress: bool,

    /// Crash ids or crash-stats report URLs.
    crash_ids: Vec<String>,
}

fn main() {
    match try_main() {
        Ok(()) => (),
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(1);
        }
    }
}

fn try_main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let mut args = Args::parse();

    if args.config_file.is_none() && std::fs::exists(DEFAULT_CONFIG_FILE).unwrap_or(false) {
        args.config_file = Some(DEFAULT_CONFIG_FILE.into());
    }

    let config: config::Config = if let Some(file) = &args.config_file {
        std::fs::read_to_string(file)
            .map_err(anyhow::Error::from)
            .and_then(|s| Ok(toml::from_str(&s)?))
            .with_context(|| format!("while reading {}", file.display()))?
    } else {
        Default::default()
    };

    let host = args
        .host
        .or(config.host)
        .unwrap_or_else(|| config::DEFAULT_HOST.to_string());
    let api_token = args.api_token.or(config.api_token);

    let lists = match &args.siglists {
        Some(dir) => SignatureLists::from_dir(dir)
            .with_context(|| format!("while loading signature lists from {}", dir.display()))?,
        None => SignatureLists::bundled().context("while loading bundled signature lists")?,
    };
    let generator = SignatureGenerator::with_lists(Arc::new(lists));

    let crash_ids = gather_crash_ids(&args.crash_ids)?;
    anyhow::ensure!(!crash_ids.is_empty(), "no valid crash ids given");

    let status = Arc::new(Status::default());
    status.crashes.set_total(crash_ids.len());

    let cancellation_status = status.clone();
    ctrlc::set_handler(move || cancellation_status.cancel())
        .expect("failed to set interrupt handler");

    let _progress = if args.no_progress {
        None
    } else {
        Progress::new(status.clone())
    };

    let rows = run(&host, api_token.as_deref(), &crash_ids, &generator, &status)?;

    let mut output = args
        .output_file
        .map(|path| std::fs::File::create(path).map(|f| Box::new(f) as Box<dyn Write>))
        .unwrap_or_else(|| Ok(Box::new(std::io::stdout())))?;

    match args.format {
        OutputFormat::Text => report::write_text(&mut output, &rows, args.verbose)?,
        OutputFormat::Csv => report::write_csv(&mut output, &rows)?,
        OutputFormat::Markdown => report::write_markdown(&mut output, &rows)?,
    }

    Ok(())
}

/// Normalizes crash ids from the command line, or from stdin when none
/// were given. Invalid items are warned about and skipped.
fn gather_crash_ids(from_args: &[String]) -> anyhow::Result<Vec<String>> {
    let items: Vec<String> = if from_args.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<_, _>>()
            .context("while reading crash ids from stdin")?
    } else {
        from_args.to_vec()
    };

    Ok(items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .filter_map(|item| match parse_crashid(item) {
            Some(crash_id) => Some(crash_id.to_string()),
            None => {
                log::warn!("not a valid crash id: {item}");
                None
            }
        })
        .collect())
}

/// Fetches every crash concurrently and generates a new signature for
/// each. Fetch failures skip the crash; authentication and rate-limit
/// failures abort the run.
fn run(
    host: &str,
    api_token: Option<&str>,
    crash_ids: &[String],
    generator: &SignatureGenerator,
    status: &Status,
) -> anyhow::Result<Vec<Row>> {
    let mut builder = runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("siggen-fetch");

    builder.build()?.block_on(async {
        let client = fetch::CrashStats::new(host.to_string(), api_token)?;

        let mut requests = FuturesUnordered::from_iter(crash_ids.iter().enumerate().map(
            |(index, crash_id)| {
                let client = &client;
                async move { (index, crash_id, client.processed_crash(crash_id).await) }
            },
        ));

        let mut rows: Vec<(usize, Row)> = Vec::new();
        while let Some((index, crash_id, result)) = requests.next().await {
            if status.is_cancelled() {
                break;
            }
            status.crashes.inc_complete();
            match result {
                Ok(processed) => {
                    let old_signature = processed
                        .get("signature")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let crash_data = CrashData::from_processed_crash(&processed);
                    let generated = generator.generate(&crash_data);
                    rows.push((
                        index,
                        Row {
                            crash_id: crash_id.clone(),
                            old_signature,
                            result: generated,
                        },
                    ));
                }
                Err(error @ (FetchError::Auth(_) | FetchError::RateLimited)) => {
                    return Err(error.into());
                }
                Err(error) => {
                    log::warn!("{crash_id}: fetch failed: {error}");
                    status.crashes.inc_failed();
                }
            }
        }

        // Report in the order the crash ids were given.
        rows.sort_by_key(|(index, _)| *index);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    })
}
