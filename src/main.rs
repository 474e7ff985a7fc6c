use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loyalty_points::accrual::HttpAccrualClient;
use loyalty_points::config::{Cli, Command, Settings};
use loyalty_points::csv::{Request, read_requests, write_balance, write_orders, write_withdrawals};
use loyalty_points::reconcile::{Dispatcher, ReconcileWorker};
use loyalty_points::repository::{Repositories, SqliteStore};
use loyalty_points::usecase::{AccountQueries, UploadOrder, Withdraw};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = SqliteStore::connect(&cli.settings.database_uri)
        .await
        .with_context(|| format!("failed to open database {}", cli.settings.database_uri))?;
    let repos = store.repositories();

    match cli.command {
        Command::Import { file } => import(&repos, &file).await?,
        Command::Reconcile { once } => reconcile(&repos, &cli.settings, once).await?,
        Command::Balance { user } => {
            let balance = AccountQueries::new(&repos).balance(user).await?;
            write_balance(io::stdout().lock(), &balance)?;
        }
        Command::Orders { user } => {
            let orders = AccountQueries::new(&repos).orders(user).await?;
            write_orders(io::stdout().lock(), &orders)?;
        }
        Command::Withdrawals { user } => {
            let withdrawals = AccountQueries::new(&repos).withdrawals(user).await?;
            write_withdrawals(io::stdout().lock(), &withdrawals)?;
        }
    }

    Ok(())
}

/// Apply every row of `file`. Bad rows and rejected requests are logged and skipped.
async fn import(repos: &Repositories, file: &Path) -> Result<()> {
    if file.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %file.display(), "input file seems to not be a csv file");
    }

    let upload = UploadOrder::new(repos);
    let withdraw = Withdraw::new(repos);

    for result in read_requests(file)? {
        let request = match result {
            Ok(request) => request,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };

        match request {
            Request::Upload { user, number } => match upload.execute(user, &number).await {
                Ok(status) => info!(user, number, status = status.as_str(), "upload"),
                Err(e) => warn!(user, number, "upload rejected: {e}"),
            },
            Request::Withdraw { user, number, sum } => {
                if let Err(e) = withdraw.execute(user, &number, sum).await {
                    warn!(user, number, sum = %sum, "withdraw rejected: {e}");
                }
            }
        }
    }

    Ok(())
}

async fn reconcile(repos: &Repositories, settings: &Settings, once: bool) -> Result<()> {
    let accrual_config = settings
        .accrual_config()
        .context("accrual system address is required (-r or ACCRUAL_SYSTEM_ADDRESS)")?;
    let client = HttpAccrualClient::new(accrual_config).context("failed to build accrual client")?;
    let dispatcher = Dispatcher::new(repos, Arc::new(client), settings.reconcile_config());
    let shutdown = CancellationToken::new();

    if once {
        dispatcher.process_pending_orders(&shutdown).await?;
        return Ok(());
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal.cancel(),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    ReconcileWorker::new(dispatcher, settings.poll_interval(), shutdown)
        .run()
        .await;
    info!("reconcile worker stopped");
    Ok(())
}
