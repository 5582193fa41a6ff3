use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use taxi_loader::config::{DbConfig, JobConfig, SourceTemplate, DEFAULT_BATCH_SIZE, DEFAULT_TABLE, DEFAULT_URL_PREFIX};
use taxi_loader::ingestion::SchemaDescriptor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taxi-loader")]
#[command(about = "Load NYC taxi trip files into Postgres in chunks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the target table and load the whole file into it
    Load(LoadArgs),

    /// Print the first rows of the file and the table definition, without loading
    Preview(PreviewArgs),
}

#[derive(Args)]
struct DbArgs {
    /// Postgres user
    #[arg(long, env = "PG_USER", default_value = "root")]
    user: String,

    /// Postgres password
    #[arg(long, env = "PG_PASSWORD", default_value = "root", hide_env_values = true)]
    password: String,

    /// Postgres host
    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    host: String,

    /// Postgres port
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    port: u16,

    /// Postgres database name
    #[arg(long, env = "PG_DB", default_value = "ny_taxi")]
    db: String,
}

#[derive(Args)]
struct SourceArgs {
    /// Year of the trip file
    #[arg(long, default_value_t = 2021)]
    year: i32,

    /// Month of the trip file (1-12)
    #[arg(long, default_value_t = 1)]
    month: u32,

    /// Base URL the trip files are published under
    #[arg(long, default_value = DEFAULT_URL_PREFIX)]
    url_prefix: String,

    /// Explicit file path or URL, instead of the year/month template
    #[arg(long)]
    source: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    source: SourceArgs,

    /// Target table name
    #[arg(long, default_value = DEFAULT_TABLE)]
    table: String,

    /// Rows per chunk
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Print the load report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Target table name used in the printed definition
    #[arg(long, default_value = DEFAULT_TABLE)]
    table: String,

    /// Number of rows to read
    #[arg(long, default_value_t = 100)]
    rows: usize,
}

impl SourceArgs {
    fn apply(self, config: &mut JobConfig) {
        config.year = self.year;
        config.month = self.month;
        config.template = SourceTemplate::new(self.url_prefix);
        config.source = self.source;
    }
}

impl From<DbArgs> for DbConfig {
    fn from(args: DbArgs) -> Self {
        DbConfig {
            user: args.user,
            password: args.password,
            host: args.host,
            port: args.port,
            database: args.db,
            ..DbConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Load(args) => load(args).await,
        Command::Preview(args) => preview(args).await,
    }
}

async fn load(args: LoadArgs) -> Result<()> {
    let report_json = args.report_json;
    let mut config = JobConfig {
        db: args.db.into(),
        table: args.table,
        batch_size: args.batch_size,
        ..JobConfig::default()
    };
    args.source.apply(&mut config);

    info!("Taxi loader starting...");

    // failures are already logged by the loader
    let report = taxi_loader::run_job(&config, SchemaDescriptor::yellow_tripdata())
        .await
        .context("ingestion failed")?;

    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

async fn preview(args: PreviewArgs) -> Result<()> {
    let mut config = JobConfig {
        table: args.table,
        ..JobConfig::default()
    };
    args.source.apply(&mut config);

    let preview = taxi_loader::preview(&config, SchemaDescriptor::yellow_tripdata(), args.rows)
        .await
        .context("preview failed")?;

    println!("{}", preview.frame);
    println!("\n{}", preview.create_table);

    Ok(())
}
