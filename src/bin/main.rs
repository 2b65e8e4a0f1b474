use financial_report_pipeline::{
    config::AppConfig,
    models::{ReportRequest, SourceDocument},
    RunContext, WorkflowClassifier,
};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str =
    "usage: report <current-period-file> <prior-period-file> [--company NAME] [--instructions TEXT]";

fn media_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn load_document(path: &str) -> std::io::Result<SourceDocument> {
    let path = Path::new(path);
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    Ok(SourceDocument::new(name, media_type(path), bytes))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so stdout carries only the report JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut paths = Vec::new();
    let mut company_name = None;
    let mut instructions = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--company" => company_name = args.next(),
            "--instructions" => instructions = args.next(),
            _ => paths.push(arg),
        }
    }

    let [current, prior] = paths.as_slice() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = AppConfig::from_env();
    let pipeline = config.build_pipeline()?;

    let preferences = instructions
        .as_deref()
        .map(|text| WorkflowClassifier::classify(text, config.preferences))
        .unwrap_or(config.preferences);

    let request = ReportRequest {
        company_name,
        current_period: load_document(current).await?,
        prior_period: load_document(prior).await?,
        preferences,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = RunContext::new(Uuid::new_v4()).with_progress(tx);

    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(attempt = event.attempt_number, phase = %event.phase, "Progress");
        }
    });

    let cancel = ctx.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            cancel.cancel();
        }
    });

    info!(run_id = %ctx.run_id(), "Running report pipeline");
    let outcome = pipeline.orchestrator.run(&request, &ctx).await;
    drop(ctx);
    progress.await?;

    match outcome {
        Ok(completed) => {
            println!("{}", serde_json::to_string_pretty(&completed)?);
            let usage = pipeline.client.usage();
            info!(
                attempts = completed.attempts,
                status = %completed.verification.overall_status,
                requests = usage.requests,
                cost_usd = usage.cost_usd,
                "Report complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Report run failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}
