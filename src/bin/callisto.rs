use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use callisto_mapillary::app::App;
use callisto_mapillary::config::SettingsLoader;
use callisto_mapillary::domain::{Encoding, TimeRange};
use callisto_mapillary::error::{
    ConfigError, DownloadError, FetchError, MaterializeError, MergeError, PersistError,
    RemoteError, ResolutionError,
};
use callisto_mapillary::mapillary::MapillaryHttpClient;
use callisto_mapillary::output::{
    HumanOutput, JsonOutput, MergeSummary, OutputMode, SequencesSummary,
};
use callisto_mapillary::store::Store;

#[derive(Parser)]
#[command(name = "callisto")]
#[command(about = "Fetch, merge and download Mapillary sequences of a user")]
#[command(version, author)]
struct Cli {
    /// Settings override file (defaults to ./callisto.local.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON to stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Show the Mapillary account of a user")]
    User(UserArgs),
    #[command(about = "Print the account key of a user")]
    Key(UserArgs),
    #[command(about = "Fetch the sequences of a user")]
    Sequences(SequencesArgs),
    #[command(about = "Merge the sequences of a user into one trajectory")]
    Merge(MergeArgs),
    #[command(about = "Download thumbnails along the merged trajectory of a user")]
    Images(ImagesArgs),
}

#[derive(Args)]
struct UserArgs {
    username: String,
}

#[derive(Args)]
struct SequencesArgs {
    username: String,

    #[arg(long, value_enum, default_value = "json")]
    format: Encoding,

    #[arg(long)]
    start: Option<NaiveDate>,

    #[arg(long)]
    end: Option<NaiveDate>,

    /// Save the response to <username>_sequences.<format>
    #[arg(long)]
    save: bool,
}

#[derive(Args)]
struct MergeArgs {
    username: String,

    /// Write the merged trajectory as JSON to this path
    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ImagesArgs {
    username: String,

    /// Number of images to download from the start of the trajectory
    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// Download every image of the trajectory
    #[arg(long, conflicts_with = "limit")]
    all: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(map_exit_code(&report));
    }
    ExitCode::SUCCESS
}

fn map_exit_code(report: &miette::Report) -> u8 {
    if let Some(err) = report.downcast_ref::<ResolutionError>() {
        return resolution_code(err);
    }
    if let Some(err) = report.downcast_ref::<FetchError>() {
        return fetch_code(err);
    }
    if let Some(err) = report.downcast_ref::<MergeError>() {
        return merge_code(err);
    }
    if let Some(err) = report.downcast_ref::<PersistError>() {
        return match err {
            PersistError::Fetch(inner) => fetch_code(inner),
            PersistError::Filesystem(_) => 1,
        };
    }
    if let Some(err) = report.downcast_ref::<DownloadError>() {
        return match err {
            DownloadError::Merge(inner) => merge_code(inner),
            DownloadError::Materialize(MaterializeError::Download { .. }) => 3,
            DownloadError::Materialize(_) => 1,
        };
    }
    if report.downcast_ref::<RemoteError>().is_some() {
        return 3;
    }
    if report.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    1
}

fn resolution_code(error: &ResolutionError) -> u8 {
    match error {
        ResolutionError::NotFound(_) | ResolutionError::InvalidUsername(_) => 2,
        ResolutionError::Remote(_) | ResolutionError::Malformed(_) => 3,
    }
}

fn fetch_code(error: &FetchError) -> u8 {
    match error {
        FetchError::InvalidFormat(_) | FetchError::InvalidTimeRange { .. } => 2,
        FetchError::Resolution(inner) => resolution_code(inner),
        FetchError::Remote(_) | FetchError::Malformed(_) => 3,
    }
}

fn merge_code(error: &MergeError) -> u8 {
    match error {
        MergeError::FetchFailed(inner) => fetch_code(inner),
        MergeError::Inconsistent { .. } => 1,
    }
}

/// Filter from `RUST_LOG`, or warnings and errors when unset or invalid.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let settings = SettingsLoader::resolve(cli.config.as_deref())?;
    let store = Store::new(&settings);
    let client = MapillaryHttpClient::new(settings)?;
    let mut app = App::new(store, client);

    match cli.command {
        Command::User(args) => {
            let account = app.resolve_username(&args.username)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_account(account).into_diagnostic()?,
                OutputMode::Human => {
                    let profile = serde_json::to_string_pretty(account).into_diagnostic()?;
                    println!("{profile}");
                }
            }
            Ok(())
        }
        Command::Key(args) => {
            let key = app.account_id(&args.username)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&key).into_diagnostic()?,
                OutputMode::Human => println!("{key}"),
            }
            Ok(())
        }
        Command::Sequences(args) => run_sequences(args, &mut app, output_mode),
        Command::Merge(args) => run_merge(args, &mut app, output_mode),
        Command::Images(args) => {
            let limit = (!args.all).then_some(args.limit);
            let report = app.download_trajectory_images(&args.username, limit)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_assets(&report).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_assets(&report),
            }
            Ok(())
        }
    }
}

fn run_sequences(
    args: SequencesArgs,
    app: &mut App<MapillaryHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let defaults = TimeRange::default();
    let window = TimeRange::new(
        args.start.unwrap_or(defaults.start()),
        args.end.unwrap_or(defaults.end()),
    )?;

    let set = app.fetch_sequences(&args.username, args.format, &window)?;
    let account_key = set.account_id.to_string();
    let fragments = set.fragments().map(|fragments| fragments.len());
    let bytes = set.payload.as_bytes().len();

    let saved_to = if args.save {
        Some(app.persist_sequences(&args.username, args.format)?.to_string())
    } else {
        None
    };

    let summary = SequencesSummary {
        username: args.username,
        account_key,
        format: args.format.to_string(),
        fragments,
        bytes,
        saved_to,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_sequences(&summary).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_sequences(&summary),
    }
    Ok(())
}

fn run_merge(
    args: MergeArgs,
    app: &mut App<MapillaryHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let merged = app.merge_trajectory(&args.username)?;

    let saved_to = match &args.output {
        Some(path) => {
            let content = serde_json::to_vec_pretty(&merged).into_diagnostic()?;
            Store::write_bytes_atomic(path, &content).into_diagnostic()?;
            Some(path.to_string())
        }
        None => None,
    };

    let summary = MergeSummary::new(&args.username, &merged, saved_to);
    match output_mode {
        OutputMode::Json => JsonOutput::print_merge(&summary).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_merge(&summary),
    }
    Ok(())
}
