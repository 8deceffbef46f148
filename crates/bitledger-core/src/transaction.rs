//! Transaction factory
//!
//! Selects inputs from an account, sizes the fee, splits change to fresh
//! change addresses and signs the result with the account's keys.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use bitledger_params::LedgerConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

use crate::account::Account;
use crate::address_book::KeyStore;
use crate::change::{split_change, ChangePolicy};
use crate::fees::FeeCalculator;
use crate::payment::{FeeCalculation, FeeSource, OutputOrder, PaymentOptions};
use crate::record::{Rejection, TransactionRecord};
use crate::reservation::InputReservations;
use crate::selection::CoinSelector;
use crate::utxo::Output;
use crate::{Error, Result};

/// Rounds of selection before giving up on inputs held by concurrent payments
const MAX_CLAIM_ATTEMPTS: u32 = 8;

/// Measures transactions for fee estimation
pub trait TransactionSizer: Send + Sync {
    /// Serialized size in bytes
    fn size(&self, tx: &Transaction) -> usize;
}

/// Consensus wire encoding length
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsensusSizer;

impl TransactionSizer for ConsensusSizer {
    fn size(&self, tx: &Transaction) -> usize {
        serialize(tx).len()
    }
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Transaction
    pub tx: Transaction,
    /// Transaction ID
    pub txid: Txid,
    /// Raw transaction bytes
    pub raw_tx: Vec<u8>,
    /// Transaction size as measured for the fee
    pub size: usize,
    /// Fee paid
    pub fee: u64,
    /// Outputs spent
    pub inputs: Vec<Output>,
}

impl SignedTransaction {
    /// Hex encoding of the raw transaction
    pub fn to_hex(&self) -> String {
        hex::encode(&self.raw_tx)
    }

    /// Unconfirmed snapshot for applying to an account
    pub fn record(&self) -> TransactionRecord {
        TransactionRecord::new(self.tx.clone())
    }
}

/// Builds payments out of one account
pub struct TransactionFactory {
    account: Arc<Account>,
    keys: Arc<dyn KeyStore>,
    reservations: Arc<InputReservations>,
    fees: FeeCalculator,
    change_policy: ChangePolicy,
    max_fee_iterations: u32,
    sizer: Box<dyn TransactionSizer>,
}

impl TransactionFactory {
    /// Create a factory with its own reservation registry
    pub fn new(account: Arc<Account>, keys: Arc<dyn KeyStore>, config: &LedgerConfig) -> Self {
        Self {
            account,
            keys,
            reservations: Arc::new(InputReservations::new()),
            fees: FeeCalculator::from_config(config),
            change_policy: ChangePolicy::from_config(config),
            max_fee_iterations: config.max_fee_iterations.max(1),
            sizer: Box::new(ConsensusSizer),
        }
    }

    /// Share a reservation registry with other factories
    pub fn with_reservations(mut self, reservations: Arc<InputReservations>) -> Self {
        self.reservations = reservations;
        self
    }

    /// Measure transactions with `sizer`
    pub fn with_sizer(mut self, sizer: impl TransactionSizer + 'static) -> Self {
        self.sizer = Box::new(sizer);
        self
    }

    /// Account paid from
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Reservation registry
    pub fn reservations(&self) -> &Arc<InputReservations> {
        &self.reservations
    }

    /// Fee calculator
    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Unreserved outputs covering `amount + fee`, if the account has them
    pub fn get_sufficient_sources(&self, amount: u64, fee: u64) -> Option<Vec<Output>> {
        self.select_sources(amount, fee).ok()
    }

    fn select_sources(&self, amount: u64, fee: u64) -> Result<Vec<Output>> {
        let unreserved = |outputs: Vec<Output>| -> Vec<Output> {
            outputs
                .into_iter()
                .filter(|output| !self.reservations.is_reserved(&output.outpoint))
                .collect()
        };
        let confirmed = unreserved(self.account.confirmed_outputs());
        let change = unreserved(self.account.change_outputs());

        Ok(CoinSelector::new().select(confirmed, change, amount, fee)?.outputs)
    }

    /// Select sources and reserve them in one step
    fn claim_sources(&self, amount: u64, fee: u64) -> Result<Vec<Output>> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let sources = self.select_sources(amount, fee)?;
            if self
                .reservations
                .try_reserve_all(sources.iter().map(|source| &source.outpoint))
            {
                return Ok(sources);
            }
            tracing::debug!(amount, fee, "Selected inputs reserved by another payment");
        }

        Err(Error::InsufficientFunds(format!(
            "Inputs for {} plus fee {} are held by concurrent payments",
            amount, fee
        )))
    }

    fn release_sources(&self, sources: &[Output]) {
        self.reservations
            .release_inputs(sources.iter().map(|source| &source.outpoint));
    }

    /// Pay `amounts` to `receivers`
    pub fn pay(
        &self,
        receivers: &[Address],
        amounts: &[u64],
        options: &PaymentOptions,
    ) -> Result<SignedTransaction> {
        self.pay_with_rng(receivers, amounts, options, &mut rand::thread_rng())
    }

    /// Pay with an explicit source of randomness for change and ordering.
    ///
    /// The inputs of the returned transaction stay reserved until released.
    pub fn pay_with_rng<R: Rng + ?Sized>(
        &self,
        receivers: &[Address],
        amounts: &[u64],
        options: &PaymentOptions,
        rng: &mut R,
    ) -> Result<SignedTransaction> {
        if receivers.is_empty() || receivers.len() != amounts.len() {
            return Err(Error::InvalidPayment(format!(
                "{} receivers for {} amounts",
                receivers.len(),
                amounts.len()
            )));
        }
        if amounts.iter().any(|amount| *amount == 0) {
            return Err(Error::InvalidAmount("Amount cannot be zero".to_string()));
        }
        let amount = amounts.iter().try_fold(0u64, |sum, value| sum.checked_add(*value));
        let amount =
            amount.ok_or_else(|| Error::AmountOverflow("Payment total overflow".to_string()))?;

        let mut change = ChangeAddresses::default();
        let result = match options.fee_calculation {
            FeeCalculation::Fixed(fee) => self
                .fees
                .validate_fee(fee)
                .and_then(|_| self.build(receivers, amounts, fee, options, &mut change, rng)),
            FeeCalculation::Calculated => {
                self.build_calculated(receivers, amounts, options, &mut change, rng)
            }
        };
        match &result {
            Ok(_) => self.keys.return_change_addresses(change.unused()),
            Err(_) => self.keys.return_change_addresses(&change.allocated),
        }
        let signed = result?;

        tracing::info!(
            account = %self.account.name(),
            txid = %signed.txid,
            amount,
            fee = signed.fee,
            inputs = signed.inputs.len(),
            outputs = signed.tx.output.len(),
            "Payment created"
        );
        Ok(signed)
    }

    fn build_calculated<R: Rng + ?Sized>(
        &self,
        receivers: &[Address],
        amounts: &[u64],
        options: &PaymentOptions,
        change: &mut ChangeAddresses,
        rng: &mut R,
    ) -> Result<SignedTransaction> {
        let mut fee = self.fees.initial_fee(options.priority);
        for iteration in 1..=self.max_fee_iterations {
            let signed = self.build(receivers, amounts, fee, options, change, rng)?;
            let estimate = self.fees.estimate_fee(signed.size, options.priority);
            tracing::debug!(iteration, fee, estimate, size = signed.size, "Fee iteration");
            if estimate <= fee {
                return Ok(signed);
            }
            self.release_sources(&signed.inputs);
            fee = estimate;
        }

        Err(Error::FeeConvergence(format!(
            "Fee not settled after {} iterations (last trial {})",
            self.max_fee_iterations, fee
        )))
    }

    /// One trial build. Its sources stay reserved only if it succeeds.
    fn build<R: Rng + ?Sized>(
        &self,
        receivers: &[Address],
        amounts: &[u64],
        fee: u64,
        options: &PaymentOptions,
        change: &mut ChangeAddresses,
        rng: &mut R,
    ) -> Result<SignedTransaction> {
        let sinks: Vec<(&Address, u64)> = receivers.iter().zip(amounts.iter().copied()).collect();
        let sinks = match options.fee_source {
            FeeSource::Sender => sinks,
            FeeSource::Receiver => deduct_fee(sinks, fee)?,
        };
        let sink_total: u64 = sinks.iter().map(|(_, value)| value).sum();

        let sources = self.claim_sources(sink_total, fee)?;
        let claimed: Vec<Output> = sources.clone();
        let signed = self.assemble(sources, &sinks, sink_total, fee, options, change, rng);
        if signed.is_err() {
            self.release_sources(&claimed);
        }
        signed
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble<R: Rng + ?Sized>(
        &self,
        sources: Vec<Output>,
        sinks: &[(&Address, u64)],
        sink_total: u64,
        fee: u64,
        options: &PaymentOptions,
        change: &mut ChangeAddresses,
        rng: &mut R,
    ) -> Result<SignedTransaction> {
        let input_total = CoinSelector::total_available(&sources);
        let remainder = input_total - sink_total - fee;

        let mut outputs: Vec<TxOut> = sinks
            .iter()
            .map(|(address, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: address.script_pubkey(),
            })
            .collect();

        let mut total_fee = fee;
        let shares = if remainder > self.change_policy.dust_limit {
            split_change(remainder, options.change, &self.change_policy, rng)?
        } else {
            total_fee += remainder;
            Vec::new()
        };
        let addresses = change.take(self.keys.as_ref(), shares.len())?;
        for (share, address) in shares.iter().zip(addresses) {
            outputs.push(TxOut {
                value: Amount::from_sat(*share),
                script_pubkey: address.script_pubkey(),
            });
        }

        if options.output_order == OutputOrder::Shuffled {
            outputs.shuffle(rng);
        }

        self.create_transaction(sources, outputs, total_fee)
    }

    /// Assemble and sign a transaction spending `sources` into `outputs`
    pub fn create_transaction(
        &self,
        sources: Vec<Output>,
        outputs: Vec<TxOut>,
        fee: u64,
    ) -> Result<SignedTransaction> {
        let input_value = sources
            .iter()
            .try_fold(0u64, |sum, source| sum.checked_add(source.value))
            .ok_or_else(|| Error::AmountOverflow("Input total overflow".to_string()))?;
        let output_value = outputs
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.value.to_sat()))
            .and_then(|sum| sum.checked_add(fee))
            .ok_or_else(|| Error::AmountOverflow("Output total overflow".to_string()))?;
        if input_value != output_value {
            return Err(Error::UnbalancedTransaction(format!(
                "Inputs {} != outputs {} plus fee {}",
                input_value,
                output_value - fee,
                fee
            )));
        }

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: sources
                .iter()
                .map(|source| TxIn {
                    previous_output: source.outpoint,
                    script_sig: Default::default(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        let mut script_sigs = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let address = match (&source.address, source.is_p2pkh()) {
                (Some(address), true) => address,
                _ => {
                    return Err(Error::UnspendableOutput(format!(
                        "{} is not pay-to-public-key-hash",
                        source.outpoint
                    )))
                }
            };
            let key = self
                .keys
                .key_for_address(address)
                .ok_or_else(|| Error::MissingKey(format!("No key for {}", address)))?;
            script_sigs.push(key.p2pkh_script_sig(&tx, index, &source.script_pubkey)?);
        }
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        let raw_tx = serialize(&tx);
        let size = self.sizer.size(&tx);
        let txid = tx.compute_txid();

        Ok(SignedTransaction {
            tx,
            txid,
            raw_tx,
            size,
            fee,
            inputs: sources,
        })
    }

    /// Release the inputs of a transaction that confirmed or expired
    pub fn release(&self, tx: &Transaction) -> usize {
        self.reservations
            .release_inputs(tx.input.iter().map(|input| &input.previous_output))
    }

    /// Handle a network rejection of a transaction built here
    pub fn reject(&self, rejection: &Rejection) -> Option<TransactionRecord> {
        if let Some(record) = self.account.transaction(&rejection.txid) {
            self.release(record.tx());
        }
        self.account.reject(rejection)
    }
}

impl std::fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFactory")
            .field("account", &self.account.name())
            .field("fees", &self.fees)
            .field("reserved", &self.reservations.len())
            .finish()
    }
}

/// Change addresses handed out while building one payment.
///
/// Trial builds of the fee loop reuse the same addresses; whatever the final
/// build leaves unused goes back to the key store.
#[derive(Debug, Default)]
struct ChangeAddresses {
    allocated: Vec<Address>,
    used: usize,
}

impl ChangeAddresses {
    fn take(&mut self, keys: &dyn KeyStore, count: usize) -> Result<&[Address]> {
        self.used = 0;
        while self.allocated.len() < count {
            self.allocated.push(keys.next_change_address()?);
        }
        self.used = count;
        Ok(&self.allocated[..count])
    }

    fn unused(&self) -> &[Address] {
        &self.allocated[self.used..]
    }
}

/// Take `fee` from the last sinks, dropping those it consumes entirely
fn deduct_fee(mut sinks: Vec<(&Address, u64)>, fee: u64) -> Result<Vec<(&Address, u64)>> {
    let mut remaining = fee;
    while remaining > 0 {
        let Some((_, value)) = sinks.last_mut() else {
            return Err(Error::NoOutputsLeft(format!(
                "Fee {} exceeds the payment",
                fee
            )));
        };
        if *value > remaining {
            *value -= remaining;
            remaining = 0;
        } else {
            remaining -= *value;
            sinks.pop();
        }
    }

    if sinks.is_empty() {
        return Err(Error::NoOutputsLeft(format!(
            "Fee {} consumed every output",
            fee
        )));
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::Priority;
    use crate::keys::ExtendedKeyChain;
    use crate::receiver_change::ReceiverChangeKeys;
    use crate::record::ConfirmationStatus;
    use crate::testing::{address, block_ref, payment};
    use bitcoin::{Network, OutPoint};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    struct Fixture {
        keys: Arc<ReceiverChangeKeys>,
        account: Arc<Account>,
        factory: TransactionFactory,
    }

    fn fixture() -> Fixture {
        let chain = ExtendedKeyChain::from_mnemonic(
            MNEMONIC,
            "",
            &bitledger_params::Network::regtest(),
            0,
        )
        .unwrap();
        let keys = Arc::new(ReceiverChangeKeys::new(&chain, 10).unwrap());
        let account = Arc::new(Account::new("pay", keys.clone(), Network::Regtest));
        let config = LedgerConfig::for_network(bitledger_params::NetworkType::Regtest);
        let factory = TransactionFactory::new(account.clone(), keys.clone(), &config);
        Fixture {
            keys,
            account,
            factory,
        }
    }

    fn fund(fixture: &Fixture, values: &[u64]) -> Vec<OutPoint> {
        values
            .iter()
            .map(|value| {
                let to = fixture.keys.next_receive_address().unwrap();
                let record = TransactionRecord::new(payment(&[(to, *value)]))
                    .with_status(ConfirmationStatus::Confirmed(block_ref(1)));
                fixture.account.apply(&record);
                OutPoint::new(record.txid(), 0)
            })
            .collect()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_sufficient_sources_ascending() {
        let fixture = fixture();
        fund(&fixture, &[8_000, 5_000]);

        let sources = fixture.factory.get_sufficient_sources(9_000, 1_000).unwrap();
        let values: Vec<u64> = sources.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![5_000, 8_000]);
        assert!(fixture.factory.get_sufficient_sources(13_000, 1).is_none());
    }

    #[test]
    fn test_reserved_outputs_are_skipped() {
        let fixture = fixture();
        let outpoints = fund(&fixture, &[50_000, 70_000]);
        fixture.factory.reservations().reserve_inputs([&outpoints[0]]);

        let sources = fixture.factory.get_sufficient_sources(10_000, 0).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].outpoint, outpoints[1]);
    }

    #[test]
    fn test_fixed_fee_payment_balances() {
        let fixture = fixture();
        fund(&fixture, &[100_000]);

        let options = PaymentOptions::fixed_fee(10_000).with_output_order(OutputOrder::Fixed);
        let signed = fixture
            .factory
            .pay_with_rng(&[address(9)], &[60_000], &options, &mut rng())
            .unwrap();

        assert_eq!(signed.fee, 10_000);
        assert_eq!(signed.tx.output.len(), 2);
        assert_eq!(signed.tx.output[0].value.to_sat(), 60_000);
        assert_eq!(signed.tx.output[1].value.to_sat(), 30_000);
        assert!(fixture.factory.reservations().is_reserved(&signed.inputs[0].outpoint));
        assert!(signed.tx.input.iter().all(|input| !input.script_sig.is_empty()));
        assert_eq!(signed.txid, signed.tx.compute_txid());
        assert_eq!(signed.to_hex().len(), signed.raw_tx.len() * 2);

        let change = Address::from_script(&signed.tx.output[1].script_pubkey, Network::Regtest)
            .unwrap();
        assert_eq!(
            fixture.keys.key_path_for_address(&change),
            Some((crate::receiver_change::CHANGE_CHAIN, 0))
        );
    }

    #[test]
    fn test_dust_change_is_folded_into_fee() {
        let fixture = fixture();
        fund(&fixture, &[75_000]);

        let options = PaymentOptions::fixed_fee(10_000);
        let signed = fixture
            .factory
            .pay_with_rng(&[address(9)], &[60_000], &options, &mut rng())
            .unwrap();

        assert_eq!(signed.tx.output.len(), 1);
        assert_eq!(signed.fee, 15_000);
    }

    #[test]
    fn test_calculated_fee_meets_estimate() {
        let fixture = fixture();
        fund(&fixture, &[40_000, 40_000, 40_000]);

        let signed = fixture
            .factory
            .pay_with_rng(&[address(9)], &[90_000], &PaymentOptions::default(), &mut rng())
            .unwrap();

        let estimate = fixture.factory.fees().estimate_fee(signed.size, Priority::Normal);
        assert!(signed.fee >= estimate);
        let outputs: u64 = signed.tx.output.iter().map(|o| o.value.to_sat()).sum();
        let inputs: u64 = signed.inputs.iter().map(|i| i.value).sum();
        assert_eq!(inputs, outputs + signed.fee);
    }

    #[test]
    fn test_low_priority_pays_nothing() {
        let fixture = fixture();
        fund(&fixture, &[40_000]);

        let options = PaymentOptions::default().with_priority(Priority::Low);
        let signed = fixture
            .factory
            .pay_with_rng(&[address(9)], &[20_000], &options, &mut rng())
            .unwrap();
        assert_eq!(signed.fee, 0);
    }

    #[test]
    fn test_receiver_pays_from_tail() {
        let fixture = fixture();
        fund(&fixture, &[50_000]);

        let options = PaymentOptions::fixed_fee(10_000)
            .with_fee_source(FeeSource::Receiver)
            .with_output_order(OutputOrder::Fixed);
        let signed = fixture
            .factory
            .pay_with_rng(&[address(8), address(9)], &[30_000, 20_000], &options, &mut rng())
            .unwrap();

        let values: Vec<u64> = signed.tx.output.iter().map(|o| o.value.to_sat()).collect();
        assert_eq!(values, vec![30_000, 10_000]);
        assert_eq!(signed.fee, 10_000);
    }

    #[test]
    fn test_fee_deduction() {
        let (a, b) = (address(1), address(2));
        let sinks = deduct_fee(vec![(&a, 30_000), (&b, 5_000)], 8_000).unwrap();
        assert_eq!(sinks, vec![(&a, 27_000)]);

        assert!(matches!(
            deduct_fee(vec![(&a, 5_000)], 5_000),
            Err(Error::NoOutputsLeft(_))
        ));
        assert!(matches!(
            deduct_fee(vec![(&a, 5_000)], 6_000),
            Err(Error::NoOutputsLeft(_))
        ));
    }

    #[test]
    fn test_insufficient_funds() {
        let fixture = fixture();
        fund(&fixture, &[10_000]);

        let result = fixture.factory.pay_with_rng(
            &[address(9)],
            &[10_000],
            &PaymentOptions::fixed_fee(1_000),
            &mut rng(),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds(_))));
        assert!(fixture.factory.reservations().is_empty());
    }

    #[test]
    fn test_invalid_requests() {
        let fixture = fixture();
        let options = PaymentOptions::default();

        assert!(matches!(
            fixture.factory.pay(&[], &[], &options),
            Err(Error::InvalidPayment(_))
        ));
        assert!(matches!(
            fixture.factory.pay(&[address(9)], &[1, 2], &options),
            Err(Error::InvalidPayment(_))
        ));
        assert!(matches!(
            fixture.factory.pay(&[address(9)], &[0], &options),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            fixture
                .factory
                .pay(&[address(9)], &[1_000], &PaymentOptions::fixed_fee(2_000_000)),
            Err(Error::InvalidFee(_))
        ));
    }

    #[test]
    fn test_unbalanced_transaction() {
        let fixture = fixture();
        fund(&fixture, &[20_000]);
        let sources = fixture.account.confirmed_outputs();
        let outputs = vec![TxOut {
            value: Amount::from_sat(15_000),
            script_pubkey: address(9).script_pubkey(),
        }];

        let result = fixture.factory.create_transaction(sources, outputs, 1_000);
        assert!(matches!(result, Err(Error::UnbalancedTransaction(_))));
    }

    #[test]
    fn test_unspendable_and_unknown_sources() {
        let fixture = fixture();
        let outputs = vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: address(9).script_pubkey(),
        }];

        let mut foreign = Output {
            outpoint: crate::testing::foreign_outpoint(),
            value: 1_000,
            script_pubkey: address(7).script_pubkey(),
            address: Some(address(7)),
        };
        let result = fixture
            .factory
            .create_transaction(vec![foreign.clone()], outputs.clone(), 0);
        assert!(matches!(result, Err(Error::MissingKey(_))));

        foreign.script_pubkey = bitcoin::ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x2a]);
        foreign.address = None;
        let result = fixture.factory.create_transaction(vec![foreign], outputs, 0);
        assert!(matches!(result, Err(Error::UnspendableOutput(_))));
    }

    #[test]
    fn test_reject_releases_reservations() {
        let fixture = fixture();
        let funded = fund(&fixture, &[100_000]);
        let signed = fixture
            .factory
            .pay_with_rng(&[address(9)], &[50_000], &PaymentOptions::fixed_fee(10_000), &mut rng())
            .unwrap();
        fixture.account.apply(&signed.record());
        assert_eq!(fixture.account.confirmed(), 0);

        let rejection = Rejection {
            command: "tx".to_string(),
            txid: signed.txid,
            reason: "dust".to_string(),
            code: 0x41,
        };
        assert!(fixture.factory.reject(&rejection).is_some());
        assert!(!fixture.factory.reservations().is_reserved(&funded[0]));
        assert_eq!(fixture.account.confirmed(), 100_000);
    }

    struct FixedSizer(usize);

    impl TransactionSizer for FixedSizer {
        fn size(&self, _tx: &Transaction) -> usize {
            self.0
        }
    }

    /// Holds every build at signing until both payments got there
    struct MeetingSizer(std::sync::Barrier);

    impl TransactionSizer for MeetingSizer {
        fn size(&self, tx: &Transaction) -> usize {
            self.0.wait();
            serialize(tx).len()
        }
    }

    #[test]
    fn test_concurrent_payments_spend_distinct_inputs() {
        let fixture = fixture();
        fund(&fixture, &[100_000, 100_000]);
        let factory = fixture
            .factory
            .with_sizer(MeetingSizer(std::sync::Barrier::new(2)));
        let options = PaymentOptions::fixed_fee(10_000);

        let (first, second) = std::thread::scope(|scope| {
            let first = scope.spawn(|| factory.pay(&[address(9)], &[50_000], &options));
            let second = scope.spawn(|| factory.pay(&[address(9)], &[50_000], &options));
            (first.join().unwrap(), second.join().unwrap())
        });
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.inputs.len(), 1);
        assert_eq!(second.inputs.len(), 1);
        assert_ne!(first.inputs[0].outpoint, second.inputs[0].outpoint);
        assert_eq!(factory.reservations().len(), 2);
    }

    #[test]
    fn test_fee_trials_do_not_consume_change_addresses() {
        let fixture = fixture();
        fund(&fixture, &[100_000]);
        // 15 kB: the first trial (fee 10,000) has change, the second (fee 15,000) folds it
        let factory = fixture.factory.with_sizer(FixedSizer(15_000));

        let signed = factory
            .pay_with_rng(&[address(9)], &[80_000], &PaymentOptions::default(), &mut rng())
            .unwrap();
        assert_eq!(signed.tx.output.len(), 1);
        assert_eq!(signed.fee, 20_000);
        assert_eq!(fixture.keys.change().next_index(), 0);
    }

    #[test]
    fn test_failed_payment_returns_change_addresses() {
        let fixture = fixture();
        fund(&fixture, &[100_000]);
        // 50 kB: the second trial needs 130,000
        let factory = fixture.factory.with_sizer(FixedSizer(50_000));

        let result =
            factory.pay_with_rng(&[address(9)], &[80_000], &PaymentOptions::default(), &mut rng());
        assert!(matches!(result, Err(Error::InsufficientFunds(_))));
        assert_eq!(fixture.keys.change().next_index(), 0);
        assert!(factory.reservations().is_empty());
    }

    #[test]
    fn test_selection_overflow_is_reported() {
        let fixture = fixture();
        fund(&fixture, &[10_000]);

        let result = fixture.factory.pay_with_rng(
            &[address(9)],
            &[u64::MAX - 5],
            &PaymentOptions::fixed_fee(10_000),
            &mut rng(),
        );
        assert!(matches!(result, Err(Error::AmountOverflow(_))));
        assert!(fixture.factory.get_sufficient_sources(u64::MAX, 1).is_none());
    }
}
