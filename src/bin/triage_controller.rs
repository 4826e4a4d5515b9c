//! Triage Controller Service
//!
//! This service automates label triage for a GitHub repository by:
//! - Receiving `issues`/`pull_request` label webhooks
//! - Sweeping open PRs on a schedule (fork PRs cannot deliver label webhooks)
//! - Applying declarative path/mention/comment rules through the GitHub API
//! - Providing health endpoints

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use triage::{
    build_router, ActionExecutor, AppState, Config, Dispatcher, GitHubClient, RuleFile,
    RuleMatcher, RuleSet, TriagePipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,triage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting triage controller service v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Rules are static and shared across runs: any configuration problem
    // fails startup here rather than being skipped at run time.
    let config = Config::from_env()?;
    let rule_file = RuleFile::from_mounted_file(&config.rules_path)?;
    let rules = RuleSet::compile(&rule_file)?;
    if rules.is_empty() {
        warn!("Rule file contains no rules, triage will never act");
    }

    if config.github_token.is_none() {
        warn!("No GitHub token provided, using unauthenticated requests");
    }
    let api = Arc::new(
        GitHubClient::new(
            config.github_token.clone(),
            config.repo_owner.clone(),
            config.repo_name.clone(),
        )?,
    );

    let action_timeout = Duration::from_secs(config.action_timeout_secs);
    let pipeline = Arc::new(TriagePipeline::new(
        Arc::clone(&api) as Arc<dyn triage::RepoApi>,
        RuleMatcher::new(rules),
        ActionExecutor::new(api, action_timeout),
    ));
    let dispatcher = Arc::new(Dispatcher::new());

    // Start the scheduled scan loop in the background
    let scan_handle = if config.scan_interval_secs > 0 {
        Some(tokio::spawn(run_scan_loop(
            Arc::clone(&pipeline),
            Arc::clone(&dispatcher),
            Duration::from_secs(config.scan_interval_secs),
            Duration::from_secs(config.scan_offset_secs),
        )))
    } else {
        info!("Scheduled scan disabled, relying on webhooks only");
        None
    };

    let state = AppState {
        pipeline,
        dispatcher,
        webhook_secret: config.webhook_secret.clone(),
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(60))),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Triage HTTP server listening on 0.0.0.0:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scan_handle {
        handle.abort();
    }
    info!("Triage controller service stopped");

    Ok(())
}

/// Dispatch a reconciliation sweep at a fixed interval.
///
/// The first sweep waits for the configured offset so fleets of services
/// don't all hit the API at the same moment. Sweep runs go through the same
/// per-target groups as webhook runs, so the two trigger paths never act on
/// one target concurrently.
async fn run_scan_loop(
    pipeline: Arc<TriagePipeline>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    offset: Duration,
) {
    tokio::time::sleep(offset).await;

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        info!("Dispatching scheduled scan");
        Arc::clone(&pipeline).dispatch_scan(&dispatcher).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
