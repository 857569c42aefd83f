use anyhow::Context;
use clap::Parser;
use orggatekeeper::adapters::amqp::LapinBroker;
use orggatekeeper::core::consumer::{subscription_spec, EventConsumer};
use orggatekeeper::core::policy::resolve_policy;
use orggatekeeper::core::sync::{SyncFailure, SyncOutcome, SyncWorker};
use orggatekeeper::domain::ports::{OrgGateway, SystemClock};
use orggatekeeper::utils::error::{ErrorSeverity, GatekeeperError};
use orggatekeeper::utils::logger;
use orggatekeeper::utils::metrics::SyncMetrics;
use orggatekeeper::utils::validation::Validate;
use orggatekeeper::{CliConfig, Command, GatekeeperConfig, MoGraphQlGateway};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<GatekeeperError>().map(|e| e.severity()) {
        Some(ErrorSeverity::Low) => 0,
        Some(ErrorSeverity::Medium) => 2,
        Some(ErrorSeverity::High) | None => 1,
        Some(ErrorSeverity::Critical) => 3,
    }
}

fn report_and_exit(err: anyhow::Error) -> ! {
    tracing::error!("❌ orggatekeeper failed: {:#}", err);
    if let Some(e) = err.downcast_ref::<GatekeeperError>() {
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("💡 {}", e.recovery_suggestion());
    }
    eprintln!("❌ {:#}", err);
    std::process::exit(exit_code(&err));
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let config = match GatekeeperConfig::from_file(&cli.config) {
        Ok(mut config) => {
            cli.apply_overrides(&mut config);
            config
        }
        Err(e) => {
            logger::init_cli_logger(cli.verbose);
            report_and_exit(anyhow::Error::new(e).context(format!("loading {}", cli.config)));
        }
    };

    if config.logging.json {
        logger::init_json_logger(config.logging.verbose);
    } else {
        logger::init_cli_logger(config.logging.verbose);
    }

    if let Err(e) = run(cli.command(), config).await {
        report_and_exit(e);
    }
}

async fn run(command: Command, config: GatekeeperConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(mo = %config.mo.url, dry_run = config.sync.dry_run, "Starting orggatekeeper");

    let gateway = Arc::new(MoGraphQlGateway::from_config(&config)?);
    let policy = resolve_policy(gateway.as_ref(), &config.classification)
        .await
        .context("resolving classification policy")?;

    let metrics = Arc::new(SyncMetrics::new());
    let worker = Arc::new(
        SyncWorker::new(
            gateway.clone(),
            Arc::new(policy),
            config.sync.retry_policy(),
            Arc::new(SystemClock),
            metrics.clone(),
        )
        .with_dry_run(config.sync.dry_run),
    );

    match command {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });

            let spec = subscription_spec(
                &config.amqp.exchange,
                &config.amqp.queue_prefix,
                config.amqp.prefetch_count,
            );
            let consumer = EventConsumer::new(LapinBroker::new(config.amqp.url.clone()), worker, spec);
            consumer.run(shutdown_rx).await?;
        }
        Command::Trigger { uuids } => {
            tracing::info!(?uuids, "Manually triggered recalculation");
            recalculate(&worker, uuids, config.sync.trigger_concurrency).await?;
        }
        Command::TriggerAll { missing_only } => {
            let uuids = gateway
                .list_unit_uuids(missing_only)
                .await
                .map_err(GatekeeperError::from)?;
            tracing::info!(count = uuids.len(), missing_only, "Manually triggered recalculation");
            recalculate(&worker, uuids, config.sync.trigger_concurrency).await?;
        }
    }

    metrics.log_summary();
    Ok(())
}

async fn recalculate(
    worker: &SyncWorker<MoGraphQlGateway>,
    uuids: Vec<Uuid>,
    concurrency: usize,
) -> anyhow::Result<()> {
    let results = worker.sync_many(uuids, concurrency).await;

    let mut first_failure: Option<SyncFailure> = None;
    for (uuid, result) in results {
        match result {
            Ok(SyncOutcome::Updated { previous, category }) => {
                println!("✅ {}: {:?} -> {}", uuid, previous, category)
            }
            Ok(SyncOutcome::WouldUpdate { previous, category }) => {
                println!("📝 {}: would change {:?} -> {}", uuid, previous, category)
            }
            Ok(SyncOutcome::Unchanged(category)) => println!("➖ {}: {}", uuid, category),
            Ok(SyncOutcome::Vanished) => println!("❔ {}: not found", uuid),
            Err(failure) => {
                eprintln!("❌ {}: {}", uuid, failure);
                if first_failure.as_ref().map_or(true, |f| !f.is_fatal()) {
                    first_failure = Some(failure);
                }
            }
        }
    }

    match first_failure {
        Some(SyncFailure::Fatal(e)) | Some(SyncFailure::Exhausted(e)) => {
            Err(GatekeeperError::from(e).into())
        }
        None => Ok(()),
    }
}
