use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, error::ErrorKind};

use crate::config::DatasetConfig;
use crate::constants::config::DATASET_FILENAME;
use crate::errors::IndexError;
use crate::index::Index;
use crate::operations::OperationRegistry;

#[derive(Debug, Parser)]
#[command(
    name = "catafolk",
    disable_help_subcommand = true,
    about = "Build validated metadata indexes for folk-song datasets",
    long_about = "Collect metadata from raw files and sidecars, transform it through the dataset's declarative graph, validate it against the schema, and save a CSV index with a checksum manifest.",
    after_help = "Set RUST_LOG (e.g. RUST_LOG=catafolk=debug) for progress logging."
)]
struct CatafolkCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the index from scratch and save it.
    Make(MakeArgs),
    /// Re-index items whose raw material changed since the last save.
    Update(DatasetArgs),
    /// Print the dataset checksum.
    Checksum(ChecksumArgs),
    /// Print the transformation graph.
    Graph(DatasetArgs),
}

#[derive(Debug, Args)]
struct DatasetArgs {
    #[arg(value_name = "DATASET_DIR", help = "Dataset directory")]
    dataset_dir: PathBuf,
    #[arg(
        long,
        value_name = "FILE",
        help = "Dataset file, relative to DATASET_DIR (default: dataset.yml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Schema CSV override, relative to DATASET_DIR")]
    schema: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Index CSV location override")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MakeArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    #[arg(
        long,
        value_name = "PATH",
        help = "Write the best-effort table here when the build fails"
    )]
    diagnostics: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ChecksumArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    #[arg(
        long,
        help = "Rebuild from sources instead of reading the saved index"
    )]
    refresh: bool,
}

impl DatasetArgs {
    fn load_config(&self) -> Result<DatasetConfig, IndexError> {
        let file = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DATASET_FILENAME));
        let path = if file.is_absolute() {
            file
        } else {
            self.dataset_dir.join(file)
        };
        let mut config = DatasetConfig::load(&path)?;
        if let Some(schema) = &self.schema {
            config = config.with_schema_path(schema);
        }
        Ok(config)
    }

    fn index_path(&self, config: &DatasetConfig) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| config.index_path())
    }
}

fn initialized(config: &DatasetConfig, registry: &OperationRegistry) -> Result<Index, IndexError> {
    let mut index = Index::new(config.dataset_id.clone());
    index.initialize(config, registry)?;
    Ok(index)
}

fn make(args: &MakeArgs, registry: &OperationRegistry) -> Result<(), Box<dyn Error>> {
    let config = args.dataset.load_config()?;
    let path = args.dataset.index_path(&config);
    let mut index = initialized(&config, registry)?;
    index.collect()?;
    index.transform()?;
    print!("{}", index.report());
    if index.report().is_failed()
        && let Some(diagnostics) = &args.diagnostics
    {
        index.save_diagnostics(diagnostics)?;
        println!("diagnostic table: {}", diagnostics.display());
    }
    index.save(&path)?;
    println!("saved {} rows to {}", index.rows().len(), path.display());
    println!("checksum: {}", index.checksum()?);
    Ok(())
}

fn update(args: &DatasetArgs, registry: &OperationRegistry) -> Result<(), Box<dyn Error>> {
    let config = args.load_config()?;
    let path = args.index_path(&config);
    let mut index = initialized(&config, registry)?;
    index.load(&path)?;
    let changed = index.refresh()?;
    if changed.is_empty() {
        println!("index is up to date");
        return Ok(());
    }
    print!("{}", index.report());
    index.save(&path)?;
    println!(
        "updated {} items in {}",
        changed.len(),
        path.display()
    );
    println!("checksum: {}", index.checksum()?);
    Ok(())
}

fn checksum(args: &ChecksumArgs, registry: &OperationRegistry) -> Result<(), Box<dyn Error>> {
    let config = args.dataset.load_config()?;
    let mut index = initialized(&config, registry)?;
    if args.refresh {
        index.collect()?;
        index.transform()?;
    } else {
        index.load(&args.dataset.index_path(&config))?;
    }
    println!("{}", index.checksum()?);
    Ok(())
}

fn graph(args: &DatasetArgs, registry: &OperationRegistry) -> Result<(), Box<dyn Error>> {
    let config = args.load_config()?;
    let graph = config.build_graph(registry)?;
    println!("roots: {}", graph.roots().join(", "));
    println!("leafs: {}", graph.leafs().join(", "));
    println!("nodes: {}", graph.nodes().join(", "));
    println!("order: {}", graph.execution_order().join(" -> "));
    for (from, to) in graph.edges() {
        println!("  {from} -> {to}");
    }
    Ok(())
}

/// Run the `catafolk` command line with `args_iter` (program name excluded).
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<CatafolkCli, _>(std::iter::once("catafolk".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let registry = OperationRegistry::builtin();
    match &cli.command {
        Command::Make(args) => make(args, &registry),
        Command::Update(args) => update(args, &registry),
        Command::Checksum(args) => checksum(args, &registry),
        Command::Graph(args) => graph(args, &registry),
    }
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
