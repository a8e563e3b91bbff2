use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bbs_fetch::app::{App, PipelineOptions};
use bbs_fetch::catalog::HttpCatalogClient;
use bbs_fetch::config::{ConfigLoader, ResolvedConfig};
use bbs_fetch::domain::FailurePolicy;
use bbs_fetch::error::BbsError;
use bbs_fetch::fetch::HttpFetcher;
use bbs_fetch::output::{JsonOutput, LogProgress, write_dataset_csv};
use bbs_fetch::remote::RemoteLayout;

#[derive(Parser)]
#[command(name = "bbs-fetch")]
#[command(about = "Download, cache and merge North American Breeding Bird Survey data")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to ./bbs-fetch.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Fetch again even when a usable copy is cached
    #[arg(long, global = true)]
    overwrite: bool,

    #[arg(long, global = true, value_enum)]
    policy: Option<FailurePolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List known regions")]
    Regions(RegionsArgs),
    #[command(about = "Resolve region names to their archives")]
    Resolve(NamesArgs),
    #[command(about = "Download region archives into the cache")]
    Download(NamesArgs),
    #[command(about = "Download, parse and merge region tables")]
    Import(ImportArgs),
    #[command(about = "Fetch and print route metadata")]
    Routes,
    #[command(about = "Fetch and print survey run conditions")]
    Conditions,
    #[command(about = "Fetch and print the species list")]
    Taxonomy,
}

#[derive(Args)]
struct RegionsArgs {
    /// Only regions already present in the cache
    #[arg(long)]
    cached: bool,
}

#[derive(Args)]
struct NamesArgs {
    /// Region names, abbreviations or file stems; empty means all, or the
    /// config's `regions`
    names: Vec<String>,
}

#[derive(Args)]
struct ImportArgs {
    names: Vec<String>,

    /// Write the merged table as CSV
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Append species names to the CSV
    #[arg(long)]
    taxonomy: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BbsError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BbsError) -> u8 {
    match error {
        BbsError::UnknownRegion(_)
        | BbsError::ConfigRead(_)
        | BbsError::ConfigParse(_)
        | BbsError::InvalidRegionTable(_)
        | BbsError::InvalidUrl { .. } => 2,
        BbsError::CatalogUnavailable { .. } | BbsError::Fetch { .. } | BbsError::Http(_) => 3,
        BbsError::MalformedArchive { .. } => 4,
        BbsError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(policy) = cli.policy {
        config.policy = policy;
    }
    let options = PipelineOptions {
        overwrite: cli.overwrite || config.overwrite,
        policy: config.policy,
    };

    let app = build_app(&config)?;
    match cli.command {
        Commands::Regions(args) => {
            let regions = if args.cached {
                app.cached_regions()?
            } else {
                app.list_regions().to_vec()
            };
            JsonOutput::print_regions(&regions).into_diagnostic()
        }
        Commands::Resolve(args) => {
            let regions = app.resolve_regions(&requested(args.names, &config))?;
            JsonOutput::print_regions(&regions).into_diagnostic()
        }
        Commands::Download(args) => {
            let regions = app.resolve_regions(&requested(args.names, &config))?;
            let result = app.download_regions(&regions, &options, &LogProgress)?;
            JsonOutput::print_download(&result).into_diagnostic()
        }
        Commands::Import(args) => {
            let regions = app.resolve_regions(&requested(args.names, &config))?;
            let dataset = app.import_regions(&regions, &options, &LogProgress)?;
            if let Some(path) = &args.output {
                let taxonomy = if args.taxonomy {
                    Some(app.get_species_taxonomy(&options, &LogProgress)?)
                } else {
                    None
                };
                let file = File::create(path.as_std_path()).into_diagnostic()?;
                write_dataset_csv(BufWriter::new(file), &dataset, taxonomy.as_ref())
                    .into_diagnostic()?;
            }
            JsonOutput::print_import(&dataset, args.output.as_ref().map(|path| path.as_str()))
                .into_diagnostic()
        }
        Commands::Routes => {
            let table = app.get_route_metadata(&options, &LogProgress)?;
            JsonOutput::print_routes(&table).into_diagnostic()
        }
        Commands::Conditions => {
            let table = app.get_condition_metadata(&options, &LogProgress)?;
            JsonOutput::print_conditions(&table).into_diagnostic()
        }
        Commands::Taxonomy => {
            let table = app.get_species_taxonomy(&options, &LogProgress)?;
            JsonOutput::print_taxonomy(&table).into_diagnostic()
        }
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<App<HttpCatalogClient, HttpFetcher>> {
    let remote = RemoteLayout::new(&config.base_url)?.with_states_dir(&config.states_dir)?;
    let catalog = HttpCatalogClient::new(config.timeout)?;
    let fetcher = HttpFetcher::new(config.timeout)?;
    Ok(App::new(config.cache_layout(), remote, catalog, fetcher)
        .with_regions(config.region_index()?))
}

/// Names from the command line win over the config's list.
fn requested(names: Vec<String>, config: &ResolvedConfig) -> Vec<String> {
    if names.is_empty() {
        config.regions.clone()
    } else {
        names
    }
}
