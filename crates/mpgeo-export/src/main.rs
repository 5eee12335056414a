//! Command-line exporter for Matterport model geodata.
//!
//! Fetches sweeps, tags or notes of one model, geocodes their positions
//! through the model API and writes JSON, GeoJSON or CSV. Data goes to stdout
//! or a file; logs always go to stderr.

mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use mpgeo::{
    BatchOptions, BatchProgress, CancelFlag, Client, CredentialSources, Credentials, Destination,
    Error, ExportRecord, GeoCoordinate, KeyringStore, OutputFormat, Point3D, Result,
    TerminalPrompt, TransportConfig, batch_geocode, batch_geocode_settled, export, output,
};

use crate::cli::{Cli, Command, ExportArgs, ExportKind};

/// Progress events buffered between the batch and the logger.
const PROGRESS_BUFFER: usize = 64;

/// Exit status reported after Ctrl-C, as shells do for SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

/// User agent sent by the exporter.
const USER_AGENT: &str = concat!("mpgeo-export/", env!("CARGO_PKG_VERSION"));

/// What a Ctrl-C should do at this point of the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Stop the running batch and let in-flight requests finish.
    CancelBatch,
    /// Exit immediately.
    Exit,
}

/// Ctrl-C handling shared between the signal listener and the batch.
///
/// The first Ctrl-C during a batch cancels it; any other Ctrl-C exits.
#[derive(Debug, Clone, Default)]
struct Interrupts {
    cancel: CancelFlag,
    batch_running: Arc<AtomicBool>,
}

impl Interrupts {
    fn on_signal(&self) -> InterruptAction {
        if self.batch_running.load(Ordering::SeqCst) && !self.cancel.is_cancelled() {
            self.cancel.cancel();
            InterruptAction::CancelBatch
        } else {
            InterruptAction::Exit
        }
    }

    fn set_batch_running(&self, running: bool) {
        self.batch_running.store(running, Ordering::SeqCst);
    }

    async fn listen(self) {
        while tokio::signal::ctrl_c().await.is_ok() {
            match self.on_signal() {
                InterruptAction::CancelBatch => {
                    tracing::warn!(
                        "interrupted, finishing in-flight requests; press Ctrl-C again to exit"
                    );
                }
                InterruptAction::Exit => {
                    eprintln!("interrupted");
                    std::process::exit(INTERRUPTED_EXIT);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Export { what, args } => run_export(what, &args).await,
    };

    if let Err(e) = outcome {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_export(what: ExportKind, args: &ExportArgs) -> Result<()> {
    let model_id = args.model_id().ok_or_else(|| Error::Config {
        detail: "missing model id; pass --model-id or set MP_MODEL_ID".to_string(),
    })?;
    if what == ExportKind::Georef && args.format != OutputFormat::Json {
        return Err(Error::Config {
            detail: format!("georef only supports json output, not {}", args.format),
        });
    }
    if args.include_skybox && what != ExportKind::Sweeps {
        tracing::warn!("--include-skybox only applies to sweeps; ignoring");
    }

    let destination = Destination::from_arg(args.out.as_deref());
    let pretty = args.pretty();

    let credentials = resolve_credentials(args)?;
    let config = TransportConfig::new(&args.url, credentials.auth_header())
        .with_timeout(args.timeout())
        .with_max_rps(args.max_rps)
        .with_retries(args.retries)
        .with_user_agent(USER_AGENT);
    let client = Client::new(config)?;

    // Installed after the credential prompt so the terminal is never left without echo.
    let interrupts = Interrupts::default();
    tokio::spawn(interrupts.clone().listen());

    tracing::info!(model_id, what = ?what, format = %args.format, "starting export");

    let records = match what {
        ExportKind::Georef => {
            let georef = client.fetch_model_georeference(model_id).await?;
            if georef.is_none() {
                tracing::warn!(model_id, "model is not georeferenced");
            }
            destination.write(&output::to_json_text(&georef, pretty)?)?;
            return Ok(());
        }
        ExportKind::Sweeps => {
            let locations = client.fetch_locations(model_id).await?;
            let points = export::location_points(&locations);
            let geos = geocode(&client, model_id, &points, args, &destination, &interrupts).await?;
            export::sweep_records(&locations, &geos, args.include_skybox)
        }
        ExportKind::Tags => {
            let tags = client.fetch_tags(model_id).await?;
            let points = export::tag_points(&tags);
            let geos = geocode(&client, model_id, &points, args, &destination, &interrupts).await?;
            export::tag_records(&tags, &geos)
        }
        ExportKind::Notes => {
            let notes = client.fetch_notes(model_id).await?;
            let points = export::note_points(&notes);
            let geos = geocode(&client, model_id, &points, args, &destination, &interrupts).await?;
            export::note_records(&notes, &geos)
        }
    };

    write(&records, args.format, &destination, pretty)
}

fn write(
    records: &[ExportRecord],
    format: OutputFormat,
    destination: &Destination,
    pretty: bool,
) -> Result<()> {
    output::write_records(records, format, destination, pretty)?;
    match destination {
        Destination::File(path) => {
            tracing::info!(records = records.len(), path = %path.display(), "export written");
        }
        Destination::Stdout => tracing::debug!(records = records.len(), "export written"),
    }
    Ok(())
}

fn resolve_credentials(args: &ExportArgs) -> Result<Credentials> {
    let store = KeyringStore::default();
    let prompt = TerminalPrompt;
    CredentialSources {
        store: Some(&store),
        env: Credentials::from_env(),
        api_key: args.api_key.clone(),
        api_secret: args.api_secret.clone(),
        prompt: Some(&prompt),
        save_to_store: !args.no_save_to_keyring,
    }
    .resolve()
}

/// Geocode points in a batch, one optional coordinate per point.
///
/// With `--local-only` nothing is requested. With `--keep-going` failed
/// points come back as `None` instead of failing the export.
async fn geocode(
    client: &Client,
    model_id: &str,
    points: &[Point3D],
    args: &ExportArgs,
    destination: &Destination,
    interrupts: &Interrupts,
) -> Result<Vec<Option<GeoCoordinate>>> {
    if args.local_only {
        return Ok(vec![None; points.len()]);
    }

    let mut options =
        BatchOptions::new(args.concurrency).with_cancel(interrupts.cancel.clone());

    // Stdout carries the data, so progress is only reported for file output.
    let reporter = if destination.is_stdout() {
        None
    } else {
        let (sender, receiver) = async_channel::bounded(PROGRESS_BUFFER);
        options = options.with_progress(sender);
        Some(tokio::spawn(report_progress(receiver)))
    };

    let geocoder = Arc::new(client.geocoder(model_id));
    interrupts.set_batch_running(true);
    let outcome = if args.keep_going {
        batch_geocode_settled(geocoder, points, &options)
            .await
            .map(|results| {
                results
                    .into_iter()
                    .zip(points)
                    .map(|(result, point)| match result {
                        Ok(geo) => Some(geo),
                        Err(e) => {
                            tracing::warn!(?point, error = %e, "point not geocoded");
                            None
                        }
                    })
                    .collect()
            })
    } else {
        batch_geocode(geocoder, points, &options)
            .await
            .map(|coords| coords.into_iter().map(Some).collect())
    };

    interrupts.set_batch_running(false);
    // Dropping the options closes the progress channel and ends the reporter.
    drop(options);
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    outcome
}

/// Log batch progress at roughly every tenth of the batch.
async fn report_progress(progress: async_channel::Receiver<BatchProgress>) {
    while let Ok(event) = progress.recv().await {
        let step = (event.total / 10).max(1);
        if event.completed % step == 0 || event.completed == event.total {
            tracing::info!(
                completed = event.completed,
                total = event.total,
                rate = %format!("{:.1}/s", event.rate()),
                "geocoding"
            );
        }
    }
}
