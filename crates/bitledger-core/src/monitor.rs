//! Payment request monitor
//!
//! Watches addresses that expect a payment. Each request is tracked through
//! a dedicated [`AddressList`] account registered with the chain tracker, and
//! its listeners learn when the request is paid, reaches the expected number
//! of confirmations, loses its confirmation or is double spent.

use bitcoin::{Address, Network, OutPoint};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::account::{Account, AccountListener};
use crate::address_book::AddressList;
use crate::chain::{ChainTracker, ConfirmationListener};
use crate::listener::ListenerRegistry;
use crate::record::{ConfirmationStatus, TransactionRecord};
use crate::utxo::Output;

/// Confirmation state of a payment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestConfirmation {
    /// No payment confirmed yet
    #[default]
    Unconfirmed,
    /// Latest payment confirmed at this height
    At(u32),
    /// A payment was double spent
    DoubleSpent,
}

/// Expected payment to one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    address: Address,
    amount: u64,
    expected_confirmations: u32,
    received: u64,
    outputs: HashSet<OutPoint>,
    confirmation: RequestConfirmation,
}

impl PaymentRequest {
    /// Request `amount` at `address` with `expected_confirmations`
    pub fn new(address: Address, amount: u64, expected_confirmations: u32) -> Self {
        Self {
            address,
            amount,
            expected_confirmations,
            received: 0,
            outputs: HashSet::new(),
            confirmation: RequestConfirmation::Unconfirmed,
        }
    }

    /// Requested address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Requested amount
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Confirmations after which the request counts as confirmed
    pub fn expected_confirmations(&self) -> u32 {
        self.expected_confirmations
    }

    /// Value received so far
    pub fn received_amount(&self) -> u64 {
        self.received
    }

    /// Whether the received value covers the requested amount
    pub fn is_paid(&self) -> bool {
        self.received >= self.amount
    }

    /// Outputs paying the request
    pub fn outputs(&self) -> &HashSet<OutPoint> {
        &self.outputs
    }

    /// Confirmation state
    pub fn confirmation(&self) -> RequestConfirmation {
        self.confirmation
    }

    /// Height of the latest confirmed payment
    pub fn confirmation_height(&self) -> Option<u32> {
        match self.confirmation {
            RequestConfirmation::At(height) => Some(height),
            _ => None,
        }
    }

    fn add_output(&mut self, output: &Output) -> bool {
        let added = self.outputs.insert(output.outpoint);
        if added {
            self.received = self.received.saturating_add(output.value);
        }
        added
    }

    fn remove_output(&mut self, output: &Output) -> bool {
        let removed = self.outputs.remove(&output.outpoint);
        if removed {
            self.received = self.received.saturating_sub(output.value);
        }
        removed
    }

    fn confirmations_at(&self, height: u32) -> Option<u32> {
        let confirmed = self.confirmation_height()?;
        height.checked_sub(confirmed).map(|depth| depth + 1)
    }
}

/// Receives payment request progress
pub trait PaymentRequestListener: Send + Sync {
    /// A payment to the request arrived
    fn paid(&self, request: &PaymentRequest) -> anyhow::Result<()>;

    /// The request reached its expected confirmations
    fn confirmed(&self, request: &PaymentRequest) -> anyhow::Result<()>;

    /// A confirmed payment became unconfirmed
    fn unconfirmed(&self, request: &PaymentRequest) -> anyhow::Result<()>;

    /// A payment was double spent
    fn double_spent(&self, request: &PaymentRequest) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum RequestEvent {
    Paid,
    Confirmed,
    Unconfirmed,
    DoubleSpent,
}

struct Watched {
    request: PaymentRequest,
    listeners: Arc<ListenerRegistry<dyn PaymentRequestListener>>,
}

type Pending = Vec<(RequestEvent, PaymentRequest, Arc<ListenerRegistry<dyn PaymentRequestListener>>)>;

/// Watches payment requests through the chain tracker
pub struct PaymentRequestMonitor {
    book: Arc<AddressList>,
    account: Arc<Account>,
    requests: Mutex<HashMap<Address, Watched>>,
}

impl PaymentRequestMonitor {
    /// Create a monitor and register it with `tracker`
    pub fn new(network: Network, tracker: &ChainTracker) -> Arc<Self> {
        let book = Arc::new(AddressList::new());
        let account = Arc::new(Account::new("payment-requests", book.clone(), network));
        let monitor = Arc::new(Self {
            book,
            account: account.clone(),
            requests: Mutex::new(HashMap::new()),
        });

        let hook = Arc::new(MonitorHook(Arc::downgrade(&monitor)));
        account.add_listener(hook.clone());
        tracker.add_account(account);
        tracker.add_confirmation_listener(hook);
        monitor
    }

    /// Account holding payments to watched addresses
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Watch `request`, notifying `listener`.
    ///
    /// A second request for an already watched address adds the listener to
    /// the existing request.
    pub fn monitor(&self, request: PaymentRequest, listener: Arc<dyn PaymentRequestListener>) {
        let address = request.address.clone();
        let mut requests = self.requests.lock();
        let watched = requests.entry(address.clone()).or_insert_with(|| Watched {
            request,
            listeners: Arc::new(ListenerRegistry::new()),
        });
        watched.listeners.add(listener);
        self.book.add_address(address.clone());
        tracing::debug!(%address, "Monitoring payment request");
    }

    /// Remove a listener; the request is dropped with its last listener
    pub fn remove_listener(
        &self,
        address: &Address,
        listener: &Arc<dyn PaymentRequestListener>,
    ) -> bool {
        let mut requests = self.requests.lock();
        let Some(watched) = requests.get(address) else {
            return false;
        };
        let removed = watched.listeners.remove(listener);
        if watched.listeners.is_empty() {
            requests.remove(address);
            self.book.remove_address(address);
            tracing::debug!(%address, "Payment request dropped");
        }
        removed
    }

    /// Current state of the request at `address`
    pub fn request(&self, address: &Address) -> Option<PaymentRequest> {
        self.requests
            .lock()
            .get(address)
            .map(|watched| watched.request.clone())
    }

    /// Number of watched requests
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    /// Whether no request is watched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn account_changed(&self, record: &TransactionRecord) {
        let network = self.account.network();
        let double_spent = record.offending().is_some();
        let mut pending = Pending::new();
        {
            let mut requests = self.requests.lock();
            let mut changed: Vec<Address> = Vec::new();
            for (vout, tx_out) in record.tx().output.iter().enumerate() {
                let outpoint = OutPoint::new(record.txid(), vout as u32);
                let output = Output::from_tx_out(outpoint, tx_out, network);
                let Some(address) = output.address.clone() else {
                    continue;
                };
                let Some(watched) = requests.get_mut(&address) else {
                    continue;
                };
                let updated = if record.is_void() {
                    watched.request.remove_output(&output)
                } else {
                    watched.request.add_output(&output)
                };
                if updated && !changed.contains(&address) {
                    changed.push(address);
                }
            }

            for address in changed {
                let Some(watched) = requests.get(&address) else {
                    continue;
                };
                let mut push = |event| {
                    pending.push((event, watched.request.clone(), watched.listeners.clone()));
                };
                if double_spent {
                    push(RequestEvent::DoubleSpent);
                } else if !record.is_void() {
                    push(RequestEvent::Paid);
                    if watched.request.expected_confirmations == 0 {
                        push(RequestEvent::Confirmed);
                    }
                }
            }
        }
        dispatch(pending);
    }

    fn confirmation_changed(&self, record: &TransactionRecord) {
        let network = self.account.network();
        let mut pending = Pending::new();
        {
            let mut requests = self.requests.lock();
            for tx_out in &record.tx().output {
                let Ok(address) = Address::from_script(&tx_out.script_pubkey, network) else {
                    continue;
                };
                let Some(watched) = requests.get_mut(&address) else {
                    continue;
                };
                let request = &mut watched.request;
                match record.status() {
                    ConfirmationStatus::Confirmed(block) => {
                        let height = request.confirmation_height().unwrap_or(0).max(block.height);
                        request.confirmation = RequestConfirmation::At(height);
                    }
                    ConfirmationStatus::DoubleSpent { .. } => {
                        request.confirmation = RequestConfirmation::DoubleSpent;
                    }
                    ConfirmationStatus::Unconfirmed => {
                        let previous = request.confirmation;
                        request.confirmation = RequestConfirmation::Unconfirmed;
                        if previous != RequestConfirmation::Unconfirmed
                            || request.expected_confirmations == 0
                        {
                            pending.push((
                                RequestEvent::Unconfirmed,
                                request.clone(),
                                watched.listeners.clone(),
                            ));
                        }
                    }
                }
            }
        }
        dispatch(pending);
    }

    fn height_changed(&self, height: u32) {
        let pending: Pending = self
            .requests
            .lock()
            .values()
            .filter(|watched| {
                watched.request.confirmations_at(height)
                    == Some(watched.request.expected_confirmations)
            })
            .map(|watched| {
                (
                    RequestEvent::Confirmed,
                    watched.request.clone(),
                    watched.listeners.clone(),
                )
            })
            .collect();
        dispatch(pending);
    }
}

impl std::fmt::Debug for PaymentRequestMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentRequestMonitor")
            .field("requests", &self.len())
            .finish()
    }
}

fn dispatch(pending: Pending) {
    for (event, request, listeners) in pending {
        tracing::debug!(address = %request.address, ?event, "Payment request event");
        match event {
            RequestEvent::Paid => listeners.notify("paid", |l| l.paid(&request)),
            RequestEvent::Confirmed => listeners.notify("confirmed", |l| l.confirmed(&request)),
            RequestEvent::Unconfirmed => {
                listeners.notify("unconfirmed", |l| l.unconfirmed(&request))
            }
            RequestEvent::DoubleSpent => {
                listeners.notify("double_spent", |l| l.double_spent(&request))
            }
        }
    }
}

/// Forwards account and tracker events without keeping the monitor alive
struct MonitorHook(Weak<PaymentRequestMonitor>);

impl AccountListener for MonitorHook {
    fn account_changed(&self, _account: &Account, record: &TransactionRecord) -> anyhow::Result<()> {
        if let Some(monitor) = self.0.upgrade() {
            monitor.account_changed(record);
        }
        Ok(())
    }
}

impl ConfirmationListener for MonitorHook {
    fn confirmed(&self, record: &TransactionRecord) -> anyhow::Result<()> {
        if let Some(monitor) = self.0.upgrade() {
            monitor.confirmation_changed(record);
        }
        Ok(())
    }

    fn new_height(&self, height: u32) -> anyhow::Result<()> {
        if let Some(monitor) = self.0.upgrade() {
            monitor.height_changed(height);
        }
        Ok(())
    }
}
