//! Businalyst CLI - upload a spreadsheet and inspect its KPIs from the terminal.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use businalyst::aggregate::{Bucketing, Granularity, Timeframe, aggregate_timeframe, top_months};
use businalyst::archive::{load_archive, save_archive};
use businalyst::auth::AuthSession;
use businalyst::client::HttpBackend;
use businalyst::config::Config;
use businalyst::demo::demo_snapshot;
use businalyst::derive::{SeriesEntry, SeriesRequest, derive_entries, metric_cards};
use businalyst::error::{Error, Result};
use businalyst::export;
use businalyst::kpi::Metric;
use businalyst::store::{FilePersistence, SnapshotSource, SnapshotStore};
use businalyst::upload::{SelectedFile, UploadFlow};
use businalyst::views::{Breakdown, BreakdownView, gauges};

/// Cached bearer token, kept next to the snapshot
const TOKEN_FILE: &str = "session_token";

#[derive(Parser)]
#[command(name = "businalyst")]
#[command(about = "Business KPI dashboard client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL
    #[arg(long, global = true, env = "BUSINALYST_API_URL")]
    api_url: Option<String>,

    /// Directory holding the persisted snapshot
    #[arg(long, global = true, env = "BUSINALYST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "BUSINALYST_TIMEOUT_SECS")]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Clone)]
struct SeriesArgs {
    /// revenue, profit, expense or orders
    #[arg(short, long, default_value = "revenue")]
    metric: Metric,

    /// day, week, month, quarter or year
    #[arg(short, long, default_value = "month", conflicts_with = "last")]
    granularity: Granularity,

    /// Keep at most N raw points instead of calendar buckets
    #[arg(long)]
    last: Option<usize>,

    /// Keep only the N most recent buckets
    #[arg(long)]
    limit: Option<usize>,
}

impl SeriesArgs {
    fn request(&self) -> SeriesRequest {
        SeriesRequest {
            metric: self.metric,
            bucketing: match self.last {
                Some(n) => Bucketing::LastPoints(n),
                None => Bucketing::Calendar(self.granularity),
            },
            limit: self.limit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a CSV/XLSX/XLS file to the backend and keep its KPIs
    Upload {
        /// Spreadsheet to upload
        file: PathBuf,
    },

    /// Show the KPI cards of the current snapshot
    Show,

    /// Print a bucketed series with shares and deltas
    Series {
        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Revenue against another metric over a fixed window
    Timeframe {
        /// 7D, 30D or 12M
        #[arg(short, long, default_value = "12M")]
        frame: Timeframe,

        /// Metric compared with revenue
        #[arg(short, long, default_value = "expense")]
        compare: Metric,
    },

    /// Split of revenue or orders by category, with shares
    Breakdown {
        /// pie, bar, map, status, channel, region or profit
        #[arg(default_value = "pie", conflicts_with = "column")]
        kind: Breakdown,

        /// Revenue by this column instead, e.g. category or region
        #[arg(short, long)]
        column: Option<String>,
    },

    /// Best calendar months
    TopMonths {
        #[arg(short, long, default_value = "revenue")]
        metric: Metric,

        #[arg(short, default_value = "5")]
        n: usize,
    },

    /// Export a series (or the top-5 table) to CSV or XLSX
    Export {
        /// Output file; the extension picks the format
        #[arg(short, long)]
        output: PathBuf,

        /// Export the top-5 profit table instead of a series
        #[arg(long)]
        top5: bool,

        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Render a series to PNG or SVG
    Chart {
        /// Output file (.png or .svg)
        #[arg(short, long)]
        output: PathBuf,

        /// line, bar or area
        #[arg(short, long, default_value = "line")]
        kind: String,

        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Save the current snapshot to a compressed archive
    Save { path: PathBuf },

    /// Load a snapshot from an archive
    Open { path: PathBuf },

    /// Replace the current snapshot with the demo dataset
    Demo,

    /// Forget the current snapshot
    Clear,

    /// Log in to the backend
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "BUSINALYST_PASSWORD")]
        password: String,
    },

    /// Log out
    Logout,

    /// Show the logged in user
    Whoami,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(secs) = cli.timeout {
        config.request_timeout = Duration::from_secs(secs.max(1));
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = config(&cli)?;
    let mut store = SnapshotStore::open(FilePersistence::new(&config.data_dir))?;

    match cli.command {
        Commands::Upload { file } => {
            let file = SelectedFile::from_path(&file)?;
            let backend = HttpBackend::new(&config)?;
            let mut flow = UploadFlow::new();
            flow.select(file)?;
            println!("Uploading...");
            flow.submit(&backend, &mut store).await?;
            println!("Upload successful");
            print_cards(&store);
        }
        Commands::Show => print_cards(&store),
        Commands::Series { series } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            let request = series.request();
            println!("{}", request.title());
            print_entries(&request.entries(snapshot));
        }
        Commands::Timeframe { frame, compare } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            println!("{:<10} {:>14} {:>14}", "", "Revenue", compare.to_string());
            for entry in aggregate_timeframe(&snapshot.rows(), frame, compare) {
                println!(
                    "{:<10} {:>14.2} {:>14.2}",
                    entry.name, entry.revenue, entry.compare
                );
            }
        }
        Commands::Breakdown { kind, column } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            let breakdown = column.map(Breakdown::Column).unwrap_or(kind);
            let view = BreakdownView::new(snapshot, &breakdown);
            println!("{}", view.title);
            if view.segments.is_empty() {
                println!("No {} data in this snapshot", breakdown);
            }
            for segment in &view.segments {
                println!(
                    "{:<20} {:>14.2} {:>7.1}%",
                    segment.name, segment.value, segment.percentage
                );
            }
        }
        Commands::TopMonths { metric, n } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            let months = top_months(&snapshot.series(metric), n);
            print_entries(&derive_entries(&months));
        }
        Commands::Export {
            output,
            top5,
            series,
        } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            let bytes = if top5 {
                table_bytes(&output, &snapshot.top5_columns, &snapshot.top5_profit)?
            } else {
                series_bytes(&output, &series.request().entries(snapshot))?
            };
            fs::write(&output, bytes).map_err(|e| Error::io(&output, e))?;
            println!("Exported to {}", output.display());
        }
        Commands::Chart {
            output,
            kind,
            series,
        } => {
            let snapshot = store.snapshot().ok_or(Error::NoData)?;
            let request = series.request();
            render_chart(&output, &kind, &request, &request.entries(snapshot))?;
            println!("Chart written to {}", output.display());
        }
        Commands::Save { path } => {
            let stored = store.get().ok_or(Error::NoData)?;
            save_archive(stored, &path)?;
            println!("Saved to {}", path.display());
        }
        Commands::Open { path } => {
            let archived = load_archive(&path)?;
            store.load(archived.snapshot, SnapshotSource::Archive { path })?;
            print_cards(&store);
        }
        Commands::Demo => {
            store.load(demo_snapshot()?, SnapshotSource::Demo)?;
            print_cards(&store);
        }
        Commands::Clear => {
            store.clear()?;
            println!("Cleared");
        }
        Commands::Login { email, password } => {
            let backend = HttpBackend::new(&config)?;
            let mut session = AuthSession::new();
            let user = session.login(&backend, &email, &password).await?;
            println!("Logged in as {}", user.email);
            if let Some(token) = session.token() {
                save_token(&config.data_dir, token)?;
            }
        }
        Commands::Logout => {
            let backend = HttpBackend::new(&config)?;
            let mut session = AuthSession::with_token(&backend, load_token(&config.data_dir));
            session.logout(&backend).await;
            remove_token(&config.data_dir)?;
            println!("Logged out");
        }
        Commands::Whoami => {
            let backend = HttpBackend::new(&config)?;
            let mut session = AuthSession::with_token(&backend, load_token(&config.data_dir));
            match session.check(&backend).await {
                Some(user) => println!(
                    "{} <{}>",
                    user.name.as_deref().unwrap_or("(no name)"),
                    user.email
                ),
                None => {
                    remove_token(&config.data_dir)?;
                    println!("Not logged in");
                }
            }
        }
    }

    Ok(())
}

fn print_cards(store: &SnapshotStore<FilePersistence>) {
    if let Some(stored) = store.get() {
        match &stored.source {
            SnapshotSource::Uploaded {
                file_name,
                uploaded_at,
            } => println!("{} (uploaded {})", file_name, uploaded_at.format("%Y-%m-%d %H:%M")),
            SnapshotSource::Archive { path } => println!("{}", path.display()),
            SnapshotSource::Demo => println!("Demo dataset"),
        }
    }

    let cards = metric_cards(store.get());
    for (card, gauge) in cards.iter().zip(gauges(&cards)) {
        let value = card
            .value
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "-".to_string());
        let bar = format!(
            "{}{}",
            "#".repeat(gauge.filled),
            ".".repeat(gauge.segments - gauge.filled)
        );
        println!(
            "{:<10} {:>14}  target {:>12.0}  {} {:>5.1}%  {}",
            card.title, value, card.target, bar, card.progress, card.caption
        );
    }

    if store.snapshot().is_some_and(|s| !s.has_series()) {
        println!("No dated series in this snapshot; series commands will be empty");
    }
}

fn print_entries(entries: &[SeriesEntry]) {
    let pct = |v: Option<f64>| v.map(|v| format!("{:.1}%", v)).unwrap_or_default();
    let num = |v: Option<f64>| v.map(|v| format!("{:+.2}", v)).unwrap_or_default();

    println!(
        "{:<12} {:>14} {:>8} {:>14} {:>9}",
        "", "Value", "Share", "Delta", "Change"
    );
    for e in entries {
        println!(
            "{:<12} {:>14.2} {:>8} {:>14} {:>9}",
            e.label,
            e.value,
            pct(e.percentage_of_total),
            num(e.delta_from_previous),
            pct(e.relative_change)
        );
    }
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
}

fn series_bytes(output: &Path, entries: &[SeriesEntry]) -> Result<Vec<u8>> {
    if is_xlsx(output) {
        #[cfg(feature = "web")]
        return export::series_to_xlsx(entries);
        #[cfg(not(feature = "web"))]
        return Err(Error::Export(
            "XLSX export needs the `web` feature".to_string(),
        ));
    }
    Ok(export::series_to_csv(entries)?.into_bytes())
}

fn table_bytes(
    output: &Path,
    columns: &[String],
    rows: &[businalyst::kpi::TableRow],
) -> Result<Vec<u8>> {
    if is_xlsx(output) {
        #[cfg(feature = "web")]
        return export::table_to_xlsx(columns, rows);
        #[cfg(not(feature = "web"))]
        return Err(Error::Export(
            "XLSX export needs the `web` feature".to_string(),
        ));
    }
    Ok(export::table_to_csv(columns, rows)?.into_bytes())
}

#[cfg(feature = "web")]
fn render_chart(
    output: &Path,
    kind: &str,
    request: &SeriesRequest,
    entries: &[SeriesEntry],
) -> Result<()> {
    use businalyst::graph::{GraphOptions, render_png, render_svg};

    let options = GraphOptions {
        title: request.title(),
        y_label: request.metric.to_string(),
        graph_type: kind.parse()?,
        ..GraphOptions::default()
    };
    let is_svg = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

    if is_svg {
        let svg = render_svg(entries, &options)?;
        fs::write(output, svg).map_err(|e| Error::io(output, e))
    } else {
        let png = render_png(entries, &options)?;
        fs::write(output, png).map_err(|e| Error::io(output, e))
    }
}

#[cfg(not(feature = "web"))]
fn render_chart(
    _output: &Path,
    _kind: &str,
    _request: &SeriesRequest,
    _entries: &[SeriesEntry],
) -> Result<()> {
    Err(Error::Render(
        "chart rendering needs the `web` feature".to_string(),
    ))
}

fn load_token(data_dir: &Path) -> Option<String> {
    fs::read_to_string(data_dir.join(TOKEN_FILE))
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn save_token(data_dir: &Path, token: &str) -> Result<()> {
    fs::create_dir_all(data_dir).map_err(|e| Error::io(data_dir, e))?;
    let path = data_dir.join(TOKEN_FILE);
    fs::write(&path, token).map_err(|e| Error::io(&path, e))
}

fn remove_token(data_dir: &Path) -> Result<()> {
    let path = data_dir.join(TOKEN_FILE);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(&path, e)),
    }
}
