#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

use clap::{ArgAction, Parser, Subcommand};
use medlens::config::EngineConfig;
use medlens::engine::clustering::CancelToken;
use medlens::filter::{self, FilterState};
use medlens::records::{JsonRecordStore, RecordStore};
use medlens::session::Session;
use medlens::structs::{Availability, CaseRecord, LensError, Result};
use medlens::{artifacts, endpoint, engine};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// medlens - exploratory analytics over medical case collections
#[derive(Parser, Debug)]
#[command(name = "medlens")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the dashboard summary for the filtered case collection
    Analyze {
        /// Case records JSON file
        #[arg(short, long)]
        records: PathBuf,

        /// Filter state JSON file
        #[arg(short, long)]
        filter: Option<PathBuf>,

        /// Precomputed cluster file (diagnoses + cluster ids)
        #[arg(long)]
        clusters: Option<PathBuf>,

        /// Cluster display labels file
        #[arg(long, requires = "clusters")]
        cluster_labels: Option<PathBuf>,

        /// 2D category layout file
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "./medlens_output")]
        output_dir: PathBuf,
    },

    /// Run k-means on the filtered cases and print the response JSON
    Cluster {
        /// Case records JSON file
        #[arg(short, long)]
        records: PathBuf,

        /// Cluster request JSON file
        #[arg(long)]
        request: PathBuf,

        /// Filter state JSON file
        #[arg(short, long)]
        filter: Option<PathBuf>,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Also write clusters.csv to this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Select categories from the 2D layout with a lasso or rectangle
    Select {
        /// 2D category layout file
        #[arg(short, long)]
        layout: PathBuf,

        /// Lasso polygon as "x,y;x,y;..."
        #[arg(long, conflicts_with = "rect", required_unless_present = "rect")]
        lasso: Option<String>,

        /// Rectangle as "x0,x1,y0,y1"
        #[arg(long)]
        rect: Option<String>,

        /// Case records JSON file, to count matching cases
        #[arg(short, long)]
        records: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Some(Commands::Analyze {
            records,
            filter,
            clusters,
            cluster_labels,
            layout,
            config,
            output_dir,
        }) => run_analyze(&AnalyzeInputs {
            records: &records,
            filter: filter.as_deref(),
            clusters: clusters.as_deref(),
            cluster_labels: cluster_labels.as_deref(),
            layout: layout.as_deref(),
            config: config.as_deref(),
            output_dir: &output_dir,
        }),

        Some(Commands::Cluster {
            records,
            request,
            filter,
            config,
            timeout_secs,
            output_dir,
        }) => run_cluster(
            &records,
            &request,
            filter.as_deref(),
            config.as_deref(),
            timeout_secs,
            output_dir.as_deref(),
        ),

        Some(Commands::Select {
            layout,
            lasso,
            rect,
            records,
        }) => run_select(&layout, lasso.as_deref(), rect.as_deref(), records.as_deref()),

        None => {
            eprintln!("No subcommand provided. Use 'medlens analyze', 'medlens cluster' or 'medlens select'.");
            eprintln!("Run 'medlens --help' for usage information.");
            std::process::exit(1);
        }
    }
}

fn load_filter(path: Option<&Path>) -> Result<FilterState> {
    path.map_or_else(|| Ok(FilterState::default()), FilterState::from_file)
}

struct AnalyzeInputs<'a> {
    records: &'a Path,
    filter: Option<&'a Path>,
    clusters: Option<&'a Path>,
    cluster_labels: Option<&'a Path>,
    layout: Option<&'a Path>,
    config: Option<&'a Path>,
    output_dir: &'a Path,
}

/// Compute the dashboard and write summary.json, summary.txt and frequencies.csv
fn run_analyze(inputs: &AnalyzeInputs) -> Result<()> {
    let config = EngineConfig::load(inputs.config)?;
    let filter = load_filter(inputs.filter)?;

    eprintln!("Loading records: {}", inputs.records.display());
    let store = JsonRecordStore::from_file(inputs.records)?;
    eprintln!("Loaded {} cases", store.get_all_records().len());

    let clusters = inputs.clusters.map_or_else(
        || Availability::Unavailable("cluster assignments not loaded".into()),
        |path| artifacts::load_cluster_assignment(path, inputs.cluster_labels),
    );
    let layout = inputs.layout.map_or_else(
        || Availability::Unavailable("layout not loaded".into()),
        artifacts::load_layout,
    );
    if let Availability::Ready(points) = &layout {
        eprintln!("Layout: {} categories", points.len());
    }

    let mut session = Session::new(store, config)
        .with_clusters(clusters)
        .with_layout(layout);

    eprintln!("Computing summary...");
    let summary = session.set_filter(filter);
    eprintln!(
        "Working set: {} of {} cases",
        summary.totals.cases, summary.totals.total_cases
    );

    std::fs::create_dir_all(inputs.output_dir)?;
    engine::output::write_summary_json(inputs.output_dir, &summary)?;
    engine::output::write_summary(inputs.output_dir, &engine::output::render_summary(&summary))?;
    engine::output::write_frequencies_csv(inputs.output_dir, &summary)?;

    eprintln!("Output written to {}", inputs.output_dir.display());
    eprintln!("  - summary.json");
    eprintln!("  - summary.txt");
    eprintln!("  - frequencies.csv");
    for (component, reason) in summary.degraded() {
        eprintln!("  ({component}: {reason})");
    }

    Ok(())
}

/// Cluster the filtered cases; prints the response envelope either way
fn run_cluster(
    records_path: &Path,
    request_path: &Path,
    filter_path: Option<&Path>,
    config_path: Option<&Path>,
    timeout_secs: Option<u64>,
    output_dir: Option<&Path>,
) -> Result<()> {
    let config = EngineConfig::load(config_path)?;
    let filter = load_filter(filter_path)?;
    let store = JsonRecordStore::from_file(records_path)?;
    let body = std::fs::read_to_string(request_path)?;

    let mut cancel = CancelToken::new();
    if let Some(secs) = timeout_secs {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }
    let flag = cancel.flag();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, cancelling...");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| LensError::Config(format!("Failed to set Ctrl+C handler: {e}")))?;

    let working: Vec<&CaseRecord> = filter::apply(store.get_all_records(), &filter, None);
    eprintln!(
        "Clustering {} of {} cases",
        working.len(),
        store.get_all_records().len()
    );

    let outcome = endpoint::ClusterRequest::from_json(&body)
        .and_then(|request| request.validate(&config))
        .and_then(|validated| {
            let run = endpoint::run(&working, &validated, &config, &cancel)?;
            Ok((validated, run))
        });

    let (validated, run) = match outcome {
        Ok(done) => done,
        Err(e) => {
            let envelope = endpoint::ErrorResponse::from(&e);
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            return Err(e);
        }
    };

    let response = endpoint::ClusterResponse::new(&validated, &working, &run);
    println!("{}", serde_json::to_string_pretty(&response)?);
    eprint!("{}", run.result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;
        engine::output::write_clusters_csv(dir, &run.features, &run.result)?;
        eprintln!("Cluster assignments written to {}", dir.join("clusters.csv").display());
    }

    Ok(())
}

fn parse_pair(text: &str) -> Result<(f64, f64)> {
    let mut parts = text.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Ok((x, y)),
        _ => Err(LensError::InvalidInput(format!("bad point '{text}', expected x,y"))),
    }
}

/// `"x,y;x,y;..."` into polygon vertices
fn parse_polygon(text: &str) -> Result<Vec<(f64, f64)>> {
    text.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_pair)
        .collect()
}

/// `"x0,x1,y0,y1"` into rectangle bounds
fn parse_rect(text: &str) -> Result<[f64; 4]> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .map_err(|e| LensError::InvalidInput(format!("bad rectangle '{text}': {e}")))?;
    <[f64; 4]>::try_from(values)
        .map_err(|_| LensError::InvalidInput(format!("bad rectangle '{text}', expected x0,x1,y0,y1")))
}

/// Print the selected category keys and, given records, how many cases they match
fn run_select(
    layout_path: &Path,
    lasso: Option<&str>,
    rect: Option<&str>,
    records_path: Option<&Path>,
) -> Result<()> {
    let points = match artifacts::load_layout(layout_path) {
        Availability::Ready(points) => points,
        other => {
            return Err(LensError::Unavailable(
                other.placeholder().unwrap_or("layout unavailable").to_string(),
            ))
        }
    };

    let keys = match (lasso, rect) {
        (Some(polygon), _) => engine::selection::select_lasso(&points, &parse_polygon(polygon)?),
        (None, Some(bounds)) => {
            let [x0, x1, y0, y1] = parse_rect(bounds)?;
            engine::selection::select_rect(&points, x0, x1, y0, y1)
        }
        (None, None) => {
            return Err(LensError::InvalidInput("either --lasso or --rect is required".into()))
        }
    };

    for key in &keys {
        println!("{key}");
    }
    eprintln!("Selected {} of {} categories", keys.len(), points.len());

    if let Some(path) = records_path {
        let store = JsonRecordStore::from_file(path)?;
        let filter = FilterState::default().with_category_keys(Some(keys));
        let matching = filter::apply(store.get_all_records(), &filter, None);
        eprintln!("Matching cases: {}", matching.len());
    }

    Ok(())
}
