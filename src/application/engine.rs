use crate::application::generator;
use crate::application::network;
use crate::config::EngineConfig;
use crate::domain::events::LifecycleEvent;
use crate::domain::ports::{NotificationPortRef, TransactionStoreRef, WalletLedgerRef};
use crate::domain::transaction::{
    LedgerEffect, StatusReport, StatusUpdate, Transaction, TransactionKind, TransactionStatus,
};
use crate::domain::wallet::{AccountId, Amount, Balance, Wallet};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Risk score attached to alerts for withdrawals held for approval.
const APPROVAL_RISK_SCORE: u8 = 7;
const WITHDRAWAL_ADDRESS_PREFIXES: [&str; 3] = ["bc1", "1", "3"];

/// Drives deposits and withdrawals from request to a terminal status.
///
/// `ConfirmationEngine` owns the ledger, the transaction store and the
/// notification port. Requests are validated and recorded synchronously;
/// the rest of each transaction's lifecycle runs in its own background task,
/// tracked so it can be drained with [`wait_idle`](Self::wait_idle) or
/// cancelled with [`shutdown`](Self::shutdown).
///
/// The task set is only locked for synchronous bookkeeping, never across an
/// await, so requests are not held up by a concurrent `wait_idle`.
pub struct ConfirmationEngine {
    core: Arc<EngineCore>,
    tasks: Mutex<JoinSet<()>>,
}

struct EngineCore {
    ledger: WalletLedgerRef,
    store: TransactionStoreRef,
    notifier: NotificationPortRef,
    config: watch::Sender<Arc<EngineConfig>>,
    shutdown: watch::Sender<bool>,
    /// Number of spawned tasks that have not exited yet.
    in_flight: watch::Sender<usize>,
}

/// Counts one task as in flight until dropped, whether the task finished,
/// was aborted or was never polled.
struct InFlight(Arc<EngineCore>);

impl InFlight {
    fn new(core: Arc<EngineCore>) -> Self {
        core.in_flight.send_modify(|n| *n += 1);
        Self(core)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

enum Job {
    Deposit(String),
    Withdrawal(String),
}

impl Job {
    fn id(&self) -> &str {
        match self {
            Job::Deposit(id) | Job::Withdrawal(id) => id,
        }
    }
}

impl ConfirmationEngine {
    /// Creates a new `ConfirmationEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The wallet balances.
    /// * `store` - The transaction records.
    /// * `notifier` - Where lifecycle events are published.
    /// * `config` - The initial configuration snapshot; rejected if invalid.
    pub fn new(
        ledger: WalletLedgerRef,
        store: TransactionStoreRef,
        notifier: NotificationPortRef,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (config, _) = watch::channel(Arc::new(config));
        let (shutdown, _) = watch::channel(false);
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            core: Arc::new(EngineCore {
                ledger,
                store,
                notifier,
                config,
                shutdown,
                in_flight,
            }),
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// The configuration snapshot new tasks will start with.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.core.config.borrow().clone()
    }

    /// Replaces the configuration. Running tasks keep the snapshot they
    /// started with.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        info!(
            confirmation_threshold = config.confirmation_threshold,
            failure_rate_percent = config.failure_rate_percent,
            "engine configuration updated"
        );
        self.core.config.send_replace(Arc::new(config));
        Ok(())
    }

    /// Opens the wallet of a newly created account with a fresh address.
    pub async fn open_wallet(&self, account: AccountId) -> Result<Wallet> {
        let wallet = Wallet::new(account, generator::new_address(account));
        let wallet = self.core.ledger.open(wallet).await?;
        info!(account, address = %wallet.address, "wallet opened");
        Ok(wallet)
    }

    pub async fn wallet(&self, account: AccountId) -> Result<Wallet> {
        self.core.ledger.wallet(account).await
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.core.ledger.all_wallets().await
    }

    pub async fn balance(&self, account: AccountId) -> Result<Balance> {
        self.core.ledger.balance(account).await
    }

    /// Records an incoming deposit and schedules its confirmations.
    ///
    /// Returns as soon as the transaction is recorded as `initiated`.
    pub async fn start_deposit(
        &self,
        account: AccountId,
        address: &str,
        amount: Decimal,
    ) -> Result<String> {
        self.ensure_running()?;
        let amount = Amount::new(amount)?;
        let wallet = self.core.ledger.wallet(account).await?;

        let mut tx = Transaction::new(
            generator::new_transaction_id(),
            account,
            TransactionKind::Deposit,
            amount,
        );
        tx.to_address = Some(if address.is_empty() {
            wallet.address
        } else {
            address.to_string()
        });

        self.core.store.create(tx.clone(), None).await?;
        info!(transaction_id = %tx.id, account, %amount, "deposit initiated");
        self.core.notifier.publish(LifecycleEvent::status_changed(&tx));

        let id = tx.id;
        self.spawn(Job::Deposit(id.clone()));
        Ok(id)
    }

    /// Reserves funds for a withdrawal and schedules its broadcast.
    ///
    /// The balance check here is advisory; the store's debit, committed
    /// together with the `requested` record, is what rejects a request that
    /// lost a race for the same funds. Withdrawals above the approval
    /// threshold are reserved but wait for [`approve_withdrawal`](Self::approve_withdrawal).
    pub async fn request_withdrawal(
        &self,
        account: AccountId,
        to_address: &str,
        amount: Decimal,
    ) -> Result<String> {
        self.ensure_running()?;
        let amount = Amount::new(amount)?;
        validate_address(to_address)?;
        let config = self.config();

        let wallet = self.core.ledger.wallet(account).await?;
        if wallet.balance < Balance::from(amount) {
            return Err(EngineError::InsufficientBalance {
                available: wallet.balance.value(),
                requested: amount.value(),
            });
        }

        let network_status = network::sample_network_status();
        let mut tx = Transaction::new(
            generator::new_transaction_id(),
            account,
            TransactionKind::Withdrawal,
            amount,
        );
        tx.from_address = Some(wallet.address);
        tx.to_address = Some(to_address.to_string());
        tx.fee = network::compute_fee(
            amount.value(),
            network_status,
            config.base_fee,
            config.fee_cap_fraction,
        );
        tx.requires_approval = config.requires_approval(amount.value());

        self.core
            .store
            .create(tx.clone(), Some(LedgerEffect::Debit(account, amount)))
            .await?;
        info!(
            transaction_id = %tx.id,
            account,
            %amount,
            fee = %tx.fee,
            %network_status,
            "withdrawal requested, funds reserved"
        );
        self.core.notifier.publish(LifecycleEvent::status_changed(&tx));

        if tx.requires_approval {
            warn!(transaction_id = %tx.id, account, %amount, "withdrawal held for approval");
            self.core.notifier.publish(LifecycleEvent::risk_alert(
                account,
                APPROVAL_RISK_SCORE,
                format!("withdrawal {} of {} requires approval", tx.id, amount),
            ));
            return Ok(tx.id);
        }

        let id = tx.id;
        self.spawn(Job::Withdrawal(id.clone()));
        Ok(id)
    }

    /// Current state of a transaction. Never waits on a running task.
    pub async fn status(&self, id: &str) -> Result<StatusReport> {
        let tx = self.core.store.get(id).await?;
        Ok(StatusReport::from(&tx))
    }

    pub async fn transaction(&self, id: &str) -> Result<Transaction> {
        self.core.store.get(id).await
    }

    /// An account's transactions, newest first, optionally of one kind.
    pub async fn transactions(
        &self,
        account: AccountId,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>> {
        self.core.store.list_for_account(account, kind).await
    }

    /// Releases a withdrawal held for approval to the broadcast task.
    pub async fn approve_withdrawal(&self, id: &str) -> Result<StatusReport> {
        self.ensure_running()?;
        let tx = self.core.store.mark_approved(id).await?;
        info!(transaction_id = %id, account = tx.account, "withdrawal approved");
        self.spawn(Job::Withdrawal(tx.id.clone()));
        Ok(StatusReport::from(&tx))
    }

    /// Rejects a withdrawal that has not been broadcast yet and returns its
    /// reserved funds in the same commit.
    pub async fn reject_withdrawal(&self, id: &str, reason: &str) -> Result<StatusReport> {
        let tx = self.core.store.get(id).await?;
        if tx.kind != TransactionKind::Withdrawal {
            return Err(EngineError::ValidationError(format!(
                "transaction {} is not a withdrawal",
                id
            )));
        }
        let update = StatusUpdate::to(TransactionStatus::Rejected)
            .with_reason(reason)
            .with_effect(LedgerEffect::Credit(tx.account, tx.amount));
        let tx = self.core.commit(id, update).await?;
        Ok(StatusReport::from(&tx))
    }

    /// Marks a deposit that has not completed as failed. A running
    /// confirmation task notices and stops.
    pub async fn fail_deposit(&self, id: &str, reason: &str) -> Result<StatusReport> {
        let tx = self.core.store.get(id).await?;
        if tx.kind != TransactionKind::Deposit {
            return Err(EngineError::ValidationError(format!(
                "transaction {} is not a deposit",
                id
            )));
        }
        let update = StatusUpdate::to(TransactionStatus::Failed).with_reason(reason);
        let tx = self.core.commit(id, update).await?;
        Ok(StatusReport::from(&tx))
    }

    /// Schedules tasks for every non-terminal transaction in the store,
    /// e.g. after a restart on persistent storage. Returns how many were
    /// scheduled; withdrawals still awaiting approval keep waiting.
    pub async fn resume_unsettled(&self) -> Result<usize> {
        self.ensure_running()?;
        let mut resumed = 0;
        for tx in self.core.store.list_unsettled().await? {
            let job = match tx.kind {
                TransactionKind::Deposit => Job::Deposit(tx.id),
                TransactionKind::Withdrawal if tx.awaiting_approval() => continue,
                TransactionKind::Withdrawal => Job::Withdrawal(tx.id),
            };
            debug!(transaction_id = %job.id(), "resuming unsettled transaction");
            self.spawn(job);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "resumed unsettled transactions");
        }
        Ok(resumed)
    }

    /// Waits until every in-flight task has finished on its own, including
    /// tasks spawned while waiting. Requests keep being accepted meanwhile.
    pub async fn wait_idle(&self) {
        let mut idle = self.core.in_flight.subscribe();
        loop {
            // The sender lives in `core`, so this only fails if the engine is gone.
            if idle.wait_for(|n| *n == 0).await.is_err() {
                return;
            }
            let mut finished = std::mem::take(&mut *self.lock_tasks());
            while let Some(result) = finished.join_next().await {
                log_join_result(result);
            }
            if *idle.borrow() == 0 {
                return;
            }
        }
    }

    /// Cancels in-flight tasks at their next suspension point and waits for
    /// them to exit. Committed statuses are left as they are.
    pub async fn shutdown(&self) {
        self.core.shutdown.send_replace(true);
        let in_flight = *self.core.in_flight.borrow();
        info!(in_flight, "shutting down confirmation engine");
        self.wait_idle().await;
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.core.shutdown.borrow() {
            return Err(EngineError::ValidationError(
                "engine is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> Worker {
        Worker {
            core: Arc::clone(&self.core),
            config: self.config(),
            shutdown: self.core.shutdown.subscribe(),
        }
    }

    /// Registers and starts the task for `job` without awaiting, so a
    /// request that has committed its record always gets a task.
    fn spawn(&self, job: Job) {
        let worker = self.worker();
        let in_flight = InFlight::new(Arc::clone(&self.core));

        let mut tasks = self.lock_tasks();
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }
        tasks.spawn(async move {
            let _in_flight = in_flight;
            worker.run(job).await;
        });
    }
}

fn validate_address(address: &str) -> Result<()> {
    if WITHDRAWAL_ADDRESS_PREFIXES
        .iter()
        .any(|prefix| address.starts_with(prefix))
    {
        Ok(())
    } else {
        Err(EngineError::ValidationError(format!(
            "invalid destination address {:?}",
            address
        )))
    }
}

fn log_join_result(result: std::result::Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(error = %e, "confirmation task panicked"),
        Err(e) => debug!(error = %e, "confirmation task aborted"),
    }
}

impl EngineCore {
    /// Commits a transition, then logs and publishes it.
    async fn commit(&self, id: &str, update: StatusUpdate) -> Result<Transaction> {
        let tx = self.store.update_status(id, update).await?;
        info!(
            transaction_id = %tx.id,
            account = tx.account,
            kind = %tx.kind,
            status = %tx.status,
            confirmations = tx.confirmations,
            "transaction status changed"
        );
        self.notifier.publish(LifecycleEvent::status_changed(&tx));
        Ok(tx)
    }
}

/// One transaction's background task.
struct Worker {
    core: Arc<EngineCore>,
    config: Arc<EngineConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self, job: Job) {
        let id = job.id().to_string();
        let result = match job {
            Job::Deposit(id) => self.run_deposit(&id).await,
            Job::Withdrawal(id) => self.run_withdrawal(&id).await,
        };
        if let Err(e) = result {
            error!(
                transaction_id = %id,
                error = %e,
                "confirmation task failed; transaction left at its last committed status"
            );
        }
    }

    /// Sleeps for `delay`. Returns `false` if shutdown was signalled first.
    async fn pause(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            if *self.shutdown.borrow_and_update() {
                return false;
            }
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        (&mut sleep).await;
                        return true;
                    }
                }
            }
        }
    }

    fn confirmation_delay(&self) -> Duration {
        let (min, max) = self.config.confirmation_interval();
        network::sample_delay(min, max)
    }

    /// Commits `update`, or returns `None` when the transaction was moved to
    /// a state that no longer allows it.
    async fn advance(&self, id: &str, update: StatusUpdate) -> Result<Option<Transaction>> {
        match self.core.commit(id, update).await {
            Ok(tx) => Ok(Some(tx)),
            Err(e) if e.is_stale_transition() => {
                info!(transaction_id = %id, reason = %e, "transaction settled elsewhere; task stopping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_deposit(&mut self, id: &str) -> Result<()> {
        let tx = self.core.store.get(id).await?;
        if tx.status.is_terminal() {
            return Ok(());
        }

        if tx.status == TransactionStatus::Initiated {
            if !self.pause(self.confirmation_delay()).await {
                debug!(transaction_id = %id, "deposit task cancelled");
                return Ok(());
            }
            if network::should_fail(self.config.failure_rate_percent) {
                let failure = EngineError::TransientNetworkFailure(
                    "deposit dropped before its first confirmation".to_string(),
                );
                warn!(transaction_id = %id, error = %failure, "simulated network failure");
                self.advance(
                    id,
                    StatusUpdate::to(TransactionStatus::Failed).with_reason(failure.to_string()),
                )
                .await?;
                return Ok(());
            }
            let broadcast = StatusUpdate::to(TransactionStatus::Broadcasting)
                .with_hash(generator::new_tx_hash());
            if self.advance(id, broadcast).await?.is_none() {
                return Ok(());
            }
        }

        let first = tx.confirmations + 1;
        let target = self.config.confirmation_threshold.max(first);
        for confirmations in first..=target {
            if !self.pause(self.confirmation_delay()).await {
                debug!(transaction_id = %id, confirmations, "deposit task cancelled");
                return Ok(());
            }
            if self.core.store.get(id).await?.status.is_terminal() {
                info!(transaction_id = %id, "deposit already terminal; task stopping");
                return Ok(());
            }

            let update = if confirmations == target {
                StatusUpdate::to(TransactionStatus::Completed)
                    .with_confirmations(confirmations)
                    .with_effect(LedgerEffect::Credit(tx.account, tx.amount))
            } else {
                StatusUpdate::to(TransactionStatus::Pending).with_confirmations(confirmations)
            };
            if self.advance(id, update).await?.is_none() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Checks that the reservation made at request time still stands.
    async fn verify_reservation(&self, tx: &Transaction) -> std::result::Result<(), String> {
        if tx.kind != TransactionKind::Withdrawal {
            return Err(format!("{} is not a withdrawal", tx.id));
        }
        if tx.awaiting_approval() {
            return Err("withdrawal was scheduled without approval".to_string());
        }
        match self.core.ledger.wallet(tx.account).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn run_withdrawal(&mut self, id: &str) -> Result<()> {
        let tx = self.core.store.get(id).await?;

        if tx.status == TransactionStatus::Requested {
            if let Err(reason) = self.verify_reservation(&tx).await {
                warn!(transaction_id = %id, %reason, "reservation check failed; rejecting");
                let reject = StatusUpdate::to(TransactionStatus::Rejected)
                    .with_reason(reason)
                    .with_effect(LedgerEffect::Credit(tx.account, tx.amount));
                self.advance(id, reject).await?;
                return Ok(());
            }
            if !self.pause(self.config.withdrawal_broadcast_delay()).await {
                debug!(transaction_id = %id, "withdrawal task cancelled before broadcast");
                return Ok(());
            }
            let broadcast = StatusUpdate::to(TransactionStatus::Broadcasting)
                .with_hash(generator::new_tx_hash());
            if self.advance(id, broadcast).await?.is_none() {
                return Ok(());
            }
        } else if tx.status != TransactionStatus::Broadcasting {
            return Ok(());
        }

        if !self.pause(self.confirmation_delay()).await {
            debug!(transaction_id = %id, "withdrawal task cancelled while propagating");
            return Ok(());
        }
        self.advance(id, StatusUpdate::to(TransactionStatus::Completed))
            .await?;
        Ok(())
    }
}
