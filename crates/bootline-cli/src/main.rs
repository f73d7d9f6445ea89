//! Bootline binary entrypoint.
//!
//! Measures how long this Kubernetes node took to boot, renders the result,
//! and optionally keeps serving the timings as Prometheus gauges.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{Datelike, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bootline_cli::cli::{Cli, Output};
use bootline_cli::CliError;
use bootline_latency::{
    chart, default_events, ChartOptions, Measurement, MeasurementMetrics, Measurer,
};
use bootline_sources::{
    ClusterConfig, ClusterSource, CniLogSource, ImdsSource, MetadataProvider, Source, SyslogSource,
};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping measurement");
            signal_cancel.cancel();
        }
    });

    let imds = if cli.no_imds {
        None
    } else {
        Some(Arc::new(ImdsSource::new(&cli.imds_endpoint)))
    };

    // Syslog timestamps carry no year; take it from the instance's launch
    // time when the metadata endpoint is reachable.
    let launch_year = match &imds {
        Some(imds) => match imds.launch_year().await {
            Ok(year) => year,
            Err(err) => {
                tracing::debug!(%err, "launch year unavailable, using current year");
                Utc::now().year()
            }
        },
        None => Utc::now().year(),
    };

    let node_name = match (&cli.node_name, &imds) {
        (Some(name), _) => Some(name.clone()),
        (None, Some(imds)) => match imds.hostname().await {
            Ok(hostname) => Some(hostname),
            Err(err) => {
                tracing::warn!(%err, "node name unavailable from metadata endpoint");
                None
            }
        },
        (None, None) => None,
    };

    let mut builder = Measurer::builder()
        .with_source(Arc::new(SyslogSource::new(&cli.messages_path, launch_year)))
        .with_source(Arc::new(CniLogSource::new(&cli.cni_log_path, launch_year)));
    if let Some(imds) = &imds {
        builder = builder
            .with_source(Arc::clone(imds) as Arc<dyn Source>)
            .with_metadata_provider(Arc::clone(imds) as Arc<dyn MetadataProvider>);
    }
    match (ClusterConfig::in_cluster(), &node_name) {
        (Ok(config), Some(node_name)) => {
            let source = ClusterSource::new(config, node_name, &cli.pod_namespace)?;
            builder = builder.with_source(Arc::new(source));
        }
        (Err(err), _) => {
            tracing::warn!(%err, "cluster API unavailable, pod events will be skipped");
        }
        (_, None) => {
            tracing::warn!("node name unknown, pod events will be skipped");
        }
    }

    let report = builder.with_events(default_events(&cli.pod_namespace)).build();
    for skipped in &report.skipped {
        tracing::warn!(event = %skipped.event, source = %skipped.source_name, "event skipped");
    }

    let outcome = report
        .measurer
        .measure_until(
            Duration::from_secs(cli.timeout),
            Duration::from_secs(cli.retry_delay),
            &cancel,
        )
        .await;

    // Render whatever was measured, complete or not.
    let (measurement, failure) = match outcome {
        Ok(measurement) => (measurement, None),
        Err(err) => {
            let message = err.to_string();
            (err.into_measurement(), Some(message))
        }
    };
    render(&cli, &measurement)?;

    if cli.prometheus {
        let metrics = MeasurementMetrics::from_measurement(&measurement, &cli.experiment_dimension);
        serve_metrics(metrics, cli.metrics_port, &cancel).await?;
    }

    match failure {
        Some(message) => Err(CliError::Incomplete(message)),
        None => Ok(()),
    }
}

fn render(cli: &Cli, measurement: &Measurement) -> Result<(), CliError> {
    match cli.output {
        Output::Markdown => {
            let hidden_columns = if cli.no_comments {
                vec!["Comment".to_string()]
            } else {
                Vec::new()
            };
            print!("{}", chart(measurement, &ChartOptions { hidden_columns }));
        }
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(measurement)?);
        }
    }
    Ok(())
}

/// Serves the measurement's gauges on `/metrics` until interrupted.
async fn serve_metrics(
    metrics: MeasurementMetrics,
    port: u16,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let metrics = Arc::new(metrics);
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move {
                match metrics.encode() {
                    Ok(body) => (
                        [(header::CONTENT_TYPE, MeasurementMetrics::CONTENT_TYPE)],
                        body,
                    )
                        .into_response(),
                    Err(err) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
                    }
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "serving metrics until interrupted");
    tokio::select! {
        () = cancel.cancelled() => Ok(()),
        result = async { axum::serve(listener, app).await } => result.map_err(CliError::from),
    }
}
