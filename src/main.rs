use chaingate::application::engine::ConfirmationEngine;
use chaingate::config::EngineConfig;
use chaingate::domain::events::LifecycleEvent;
use chaingate::domain::ports::{NotificationPort, TransactionStoreRef, WalletLedgerRef};
use chaingate::error::{EngineError, Result as EngineResult};
use chaingate::infrastructure::in_memory::InMemoryStore;
use chaingate::infrastructure::notifier::BroadcastNotifier;
use chaingate::interfaces::csv::report_writer::{TransactionReportWriter, WalletWriter};
use chaingate::interfaces::csv::request_reader::{Request, RequestReader, RequestType};
use chaingate::logging::{LogFormat, init_logging};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input requests CSV file (type, account, amount, address)
    input: PathBuf,

    /// Engine configuration as JSON. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Write a per-transaction CSV report to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Approve withdrawals held for review as soon as they are requested.
    #[arg(long)]
    auto_approve: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(WalletLedgerRef, TransactionStoreRef)> {
    use chaingate::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    }
    let store = InMemoryStore::new();
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(WalletLedgerRef, TransactionStoreRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    let store = InMemoryStore::new();
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

async fn process_request(
    engine: &ConfirmationEngine,
    request: &Request,
    auto_approve: bool,
) -> EngineResult<()> {
    match request.r#type {
        RequestType::Open => {
            engine.open_wallet(request.require_account()?).await?;
        }
        RequestType::Deposit => {
            let account = request.require_account()?;
            let amount = request.require_amount()?;
            match engine.wallet(account).await {
                Ok(_) => {}
                Err(EngineError::WalletNotFound(_)) => {
                    engine.open_wallet(account).await?;
                }
                Err(e) => return Err(e),
            }
            let address = request.address.as_deref().unwrap_or_default();
            engine.start_deposit(account, address, amount).await?;
        }
        RequestType::Withdrawal => {
            let account = request.require_account()?;
            let amount = request.require_amount()?;
            let address = request.address.as_deref().unwrap_or_default();
            let id = engine.request_withdrawal(account, address, amount).await?;
            if auto_approve && engine.status(&id).await?.awaiting_approval {
                engine.approve_withdrawal(&id).await?;
            }
        }
        RequestType::Wait => engine.wait_idle().await,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };

    let (ledger, store) = open_stores(cli.db_path)?;
    let notifier = BroadcastNotifier::new();
    let engine =
        ConfirmationEngine::new(ledger, store, Arc::new(notifier.clone()), config).into_diagnostic()?;

    // Relay lifecycle events to the log
    let mut events = notifier.subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "lifecycle event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.resume_unsettled().await.into_diagnostic()?;

    // Process requests
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);
    for request in reader.requests() {
        match request {
            Ok(request) => {
                if let Err(e) = process_request(&engine, &request, cli.auto_approve).await {
                    eprintln!("Error processing request: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading request: {}", e);
            }
        }
    }

    engine.wait_idle().await;
    let wallets = engine.wallets().await.into_diagnostic()?;

    if let Some(path) = &cli.report {
        let mut transactions = Vec::new();
        for wallet in &wallets {
            transactions.extend(
                engine
                    .transactions(wallet.account, None)
                    .await
                    .into_diagnostic()?,
            );
        }
        let file = File::create(path).into_diagnostic()?;
        let written = TransactionReportWriter::new(file)
            .write_transactions(&transactions)
            .into_diagnostic()?;
        info!(report = %path.display(), written, "transaction report written");
        notifier.publish(LifecycleEvent::report_ready(
            path.display().to_string(),
            "ready",
        ));
    }

    // Output final state
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    engine.shutdown().await;
    listener.abort();
    Ok(())
}
