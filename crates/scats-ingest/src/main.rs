//! SCATS Ingest - Transis detector counts to Kinesis

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scats_common::logging::{init_logging, LogConfig, LogLevel};
use scats_ingest::audit::{AuditLog, PgAuditLog};
use scats_ingest::config::{Config, SourceConfig};
use scats_ingest::orchestrator::{record_fatal_error, IngestionOrchestrator};
use scats_ingest::sink::{BatchPublisher, KinesisSink, RecordSink};
use scats_ingest::transis::{Endpoint, HttpTransport, LayoutComponent, StreamClient};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scats-ingest")]
#[command(author, version, about = "Transis detector count connector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Local JSON config file to use instead of the environment
    #[arg(short, long, global = true, env = "SCATS_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream detector counts into Kinesis until a fatal error
    Stream,

    /// Issue one Transis REST request and write the XML document
    Fetch {
        #[arg(value_enum)]
        endpoint: EndpointName,

        /// Message types for date-range queries
        #[arg(long, default_value = "DetectorCount")]
        types: String,

        /// Start date (or change date) for date-based queries
        #[arg(long)]
        from: Option<String>,

        /// End date for within-dates queries
        #[arg(long)]
        to: Option<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export one component of the current topology as CSV
    Layouts {
        #[arg(short, long, value_enum)]
        component: LayoutComponent,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EndpointName {
    FromDate,
    WithinDates,
    CurrentTopology,
    TopologyChanges,
    OpenTirf,
    ClosedTirf,
    Vms,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("scats-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Stream => stream(cli.config.as_deref()).await,
        Command::Fetch {
            endpoint,
            types,
            from,
            to,
            output,
        } => {
            let endpoint = build_endpoint(endpoint, types, from, to)?;
            let transport = HttpTransport::new(&load_source(cli.config.as_deref())?)?;
            let document = transport.fetch(&endpoint).await?;
            write_output(output.as_deref(), document.xml.as_bytes())
        },
        Command::Layouts { component, output } => {
            let transport = HttpTransport::new(&load_source(cli.config.as_deref())?)?;
            let document = transport.fetch(&Endpoint::CurrentTopology).await?;
            let layouts = document
                .response
                .site_layouts()
                .context("Transis returned no site layouts")?;
            write_output(output.as_deref(), layouts.to_csv(component)?.as_bytes())
        },
    }
}

async fn stream(config_path: Option<&Path>) -> Result<()> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(severity = "critical", error = %e, "Shutting down the service as a fatal error has occurred");
            return Err(e.into());
        },
    };
    info!(?config, "Starting Transis detector count connector");

    let audit: Arc<dyn AuditLog> = Arc::new(PgAuditLog::new(&config.audit)?);
    let (outcome, failure_recorded) = match build_pipeline(&config, audit.clone()).await {
        Ok(mut orchestrator) => {
            let outcome = orchestrator.run().await;
            (outcome, orchestrator.failure_recorded())
        },
        Err(e) => (Err(e), false),
    };

    if let Err(e) = &outcome {
        error!(severity = "critical", error = %e, "Shutting down the service as a fatal error has occurred");
        // A failing document's own job already carries the error
        if !failure_recorded {
            record_fatal_error(audit.as_ref(), &e.to_string()).await;
        }
    }
    audit.close().await;

    let stats = outcome?;
    info!(documents = stats.documents, records = stats.records, "Connector stopped");
    Ok(())
}

async fn build_pipeline(
    config: &Config,
    audit: Arc<dyn AuditLog>,
) -> scats_ingest::Result<IngestionOrchestrator<HttpTransport>> {
    let transport = HttpTransport::new(&config.source)?;
    let client = StreamClient::from_config(transport, &config.source);

    let sink: Arc<dyn RecordSink> = Arc::new(KinesisSink::new(&config.sink).await);
    let publisher = BatchPublisher::from_config(sink, audit.clone(), &config.sink);

    Ok(IngestionOrchestrator::new(client, publisher, audit))
}

fn load_config(path: Option<&Path>) -> scats_ingest::Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path),
        None => Config::load(),
    }
}

fn load_source(path: Option<&Path>) -> scats_ingest::Result<SourceConfig> {
    match path {
        Some(path) => Ok(Config::from_json_file(path)?.source),
        None => SourceConfig::load(),
    }
}

fn build_endpoint(
    name: EndpointName,
    types: String,
    from: Option<String>,
    to: Option<String>,
) -> Result<Endpoint> {
    Ok(match name {
        EndpointName::FromDate => Endpoint::FromDate {
            start_date: require(from, "from")?,
            types,
        },
        EndpointName::WithinDates => Endpoint::WithinDates {
            start_date: require(from, "from")?,
            end_date: require(to, "to")?,
            types,
        },
        EndpointName::CurrentTopology => Endpoint::CurrentTopology,
        EndpointName::TopologyChanges => Endpoint::TopologyChangesFromDate {
            date: require(from, "from")?,
        },
        EndpointName::OpenTirf => Endpoint::AllOpenTirf,
        EndpointName::ClosedTirf => Endpoint::ClosedTirfFromDate {
            date: require(from, "from")?,
        },
        EndpointName::Vms => Endpoint::AllVms,
    })
}

fn require(value: Option<String>, flag: &str) -> Result<String> {
    value.with_context(|| format!("--{flag} is required for this endpoint"))
}

fn write_output(path: Option<&Path>, contents: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", contents.len(), path.display());
        },
        None => std::io::stdout().write_all(contents)?,
    }
    Ok(())
}
