use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nd2_plate::app::{App, ConversionReport, NewObject, PlanReport, ProgressEvent, ProgressSink};
use nd2_plate::config::{ConfigLoader, ScriptParams};
use nd2_plate::deletion::DeletePolicy;
use nd2_plate::domain::DataType;
use nd2_plate::error::PlateError;
use nd2_plate::output::{JsonOutput, OutputMode};
use nd2_plate::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "nd2-plate")]
#[command(about = "Arrange a dataset of ND2 images into a plate, one well per WellXN_ prefix")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create plates (and optionally a screen) from datasets")]
    Convert(ConvertArgs),
    #[command(about = "Show the well layout each dataset would get, without writing")]
    Plan(SourceArgs),
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// JSON snapshot of the image database
    #[arg(long)]
    store: Utf8PathBuf,

    /// JSON file with script parameters (Data_Type, IDs, ...)
    #[arg(long)]
    params: Option<Utf8PathBuf>,

    #[arg(long, value_enum)]
    data_type: Option<DataType>,

    /// Dataset ids to convert
    #[arg(long, value_delimiter = ',')]
    ids: Vec<u64>,

    /// Only use images whose name contains this value
    #[arg(long)]
    filter_names: Option<String>,
}

#[derive(Args, Clone)]
struct ConvertArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Id of an existing screen, or name of a new one
    #[arg(long)]
    screen: Option<String>,

    /// Leave placed images in their source dataset
    #[arg(long)]
    keep_in_dataset: bool,

    /// Delete a source dataset once all of its images are placed
    #[arg(long)]
    delete_empty_datasets: bool,

    #[arg(long, default_value_t = 60)]
    delete_timeout_secs: u64,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<PlateError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PlateError) -> u8 {
    match error {
        PlateError::Configuration(_)
        | PlateError::ConfigRead(_)
        | PlateError::ConfigParse(_)
        | PlateError::DatasetNotFound(_) => 2,
        PlateError::Store(_) | PlateError::SnapshotRead(_) | PlateError::SnapshotParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Convert(args) => run_convert(args, output_mode),
        Commands::Plan(args) => run_plan(args, output_mode),
    }
}

fn run_convert(args: ConvertArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let mut params = script_params(&args.source)?;
    if args.screen.is_some() {
        params.screen = args.screen.clone();
    }
    if args.keep_in_dataset {
        params.remove_from_dataset = Some(false);
    }
    if args.delete_empty_datasets {
        params.delete_empty_dataset = Some(true);
    }
    let resolved = ConfigLoader::resolve_params(params)?;

    let store = SnapshotStore::open(&args.source.store)?;
    let app = App::new(store).with_delete_policy(DeletePolicy {
        timeout: Duration::from_secs(args.delete_timeout_secs),
        ..DeletePolicy::default()
    });

    let result = match output_mode {
        OutputMode::Json => app.convert(&resolved, &JsonOutput),
        OutputMode::Text => app.convert(&resolved, &LogProgress),
    };
    // Whatever was written before a failure stays written.
    app.store().save()?;
    let report = result?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Text => print_report(&report),
    }

    if report.validation_error.is_some() {
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_plan(args: SourceArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let resolved = ConfigLoader::resolve_params(script_params(&args)?)?;
    let store = SnapshotStore::open(&args.store)?;
    let app = App::new(store);

    let report = match output_mode {
        OutputMode::Json => app.plan(&resolved, &JsonOutput)?,
        OutputMode::Text => app.plan(&resolved, &LogProgress)?,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_plan(&report).into_diagnostic()?,
        OutputMode::Text => print_plan(&report),
    }

    if report.datasets.iter().any(|dataset| dataset.error.is_some()) {
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}

/// Parameter file first, command line flags on top.
fn script_params(args: &SourceArgs) -> Result<ScriptParams, PlateError> {
    let mut params = match &args.params {
        Some(path) => ConfigLoader::load(path)?,
        None => ScriptParams::default(),
    };
    if let Some(data_type) = args.data_type {
        params.data_type = Some(data_type);
    }
    if params.data_type.is_none() {
        params.data_type = Some(DataType::Dataset);
    }
    if !args.ids.is_empty() {
        params.ids = args.ids.clone();
    }
    if args.filter_names.is_some() {
        params.filter_names = args.filter_names.clone();
    }
    Ok(params)
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}

fn print_report(report: &ConversionReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    if let Some(error) = &report.validation_error {
        println!("{red}{error}{reset}");
        return;
    }

    println!("{cyan}{}{reset}", report.message.trim());
    for outcome in &report.plates {
        let color = if outcome.wells_failed == 0 { green } else { yellow };
        println!(
            "{color}plate {} \"{}\" from dataset {}: {} wells, {} images placed, {} unlinked from dataset{reset}",
            outcome.plate.id,
            outcome.plate.name,
            outcome.dataset.id,
            outcome.wells_created,
            outcome.images_placed,
            outcome.images_detached
        );
        if outcome.wells_failed > 0 {
            println!("{yellow}   {} wells could not be created{reset}", outcome.wells_failed);
        }
    }
    for deletion in &report.deletions {
        println!(
            "{cyan}dataset {} deletion: {:?}{reset}",
            deletion.dataset_id, deletion.outcome
        );
    }
    match &report.new_object {
        Some(NewObject::Screen(screen)) => println!("{green}New_Object: Screen {}{reset}", screen.id),
        Some(NewObject::Plate(plate)) => println!("{green}New_Object: Plate {}{reset}", plate.id),
        None => {}
    }
}

fn print_plan(report: &PlanReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    if !report.message.is_empty() {
        println!("{}", report.message.trim());
    }
    for dataset in &report.datasets {
        println!(
            "dataset {} \"{}\" ({} images)",
            dataset.dataset.id, dataset.dataset.name, dataset.total_images
        );
        if let Some(error) = &dataset.error {
            println!("{red}   {error}{reset}");
        }
        if let Some(plan) = &dataset.plan {
            for group in &plan.wells {
                println!(
                    "{green}   {} -> row {}, column {}: {} FOV{reset}",
                    group.well,
                    group.coordinate.row,
                    group.coordinate.column,
                    group.images.len()
                );
            }
        }
    }
}
