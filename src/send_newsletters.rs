use anyhow::Context;
use arxiv_digest::clock::SystemClock;
use arxiv_digest::configuration::get_configuration;
use arxiv_digest::dispatch::{DispatchConfig, NewsletterDispatcher, PostmarkTransport};
use arxiv_digest::domain::Schedule;
use arxiv_digest::renderer::DigestRenderer;
use arxiv_digest::startup::get_connection_pool;
use arxiv_digest::store::PgStore;
use arxiv_digest::telemetry::{get_subscriber, init_subscriber};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage: send_newsletters <daily|weekly>";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let subscriber = get_subscriber("send_newsletters".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let Some(schedule) = std::env::args().nth(1) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    let schedule: Schedule = match schedule.parse() {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match send(schedule).await {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "Dispatch run failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn send(schedule: Schedule) -> Result<arxiv_digest::dispatch::RunReport, anyhow::Error> {
    let configuration = get_configuration().context("Failed to read configuration.")?;
    let store = Arc::new(PgStore::new(get_connection_pool(&configuration.database)));
    let dispatcher = NewsletterDispatcher::new(
        store,
        Arc::new(DigestRenderer),
        Arc::new(PostmarkTransport::new(configuration.email_client.clone())),
        Arc::new(SystemClock),
        DispatchConfig::from(&configuration.dispatch),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current batches.");
            on_signal.cancel();
        }
    });
    if let Some(timeout) = configuration.dispatch.run_timeout() {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(?timeout, "Run timeout reached, finishing the current batches.");
            on_timeout.cancel();
        });
    }

    let report = dispatcher.run(schedule, cancel).await?;

    Ok(report)
}
