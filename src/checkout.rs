//! The checkout-and-fulfillment orchestrator.
//!
//! One service composes the catalog, the player directory, the order store,
//! and the remote gateways. Each incoming request runs as its own task; the
//! persisted order store is the only shared state, and the only disciplined
//! resource: a pending order is created atomically when a payment
//! transaction is opened, and settled exactly once by fulfillment.
use crate::catalog::{CatalogStore, Offer};
use crate::config::StoreConfig;
use crate::discount::DiscountCalculator;
use crate::error::CheckoutError;
use crate::gateway::{ChainGateway, GameGateway, UserContext};
use crate::order::{
    LineSource, OrderLine, OrderManifest, OrderRecord, OrderStatus, OrderStore, PaymentMethod,
    SettlementOutcome,
};
use crate::payment::{
    ExchangeRateSource, PaymentProvider, ProviderOrderDraft, ProviderReceipt, SettlementState,
    UnsignedTransaction, encode_purchase_call, fiat_to_base_units,
};
use crate::players::PlayerDirectory;
use crate::pricing::PricingEngine;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

// The processor contract tracks one purchasable service today; every order
// settles against it, distinguished by the encoded order id.
const PURCHASE_SERVICE_ID: u64 = 0;

/// What a successful checkout hands back to the client, by rail.
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// The provider's transaction id, for the client-side payment UI.
    Card { provider_order_id: String },
    /// An unsigned transaction for the client to sign and broadcast.
    Crypto {
        order_id: String,
        transaction: UnsignedTransaction,
    },
}

/// Outcome of one fulfillment attempt.
#[derive(Debug)]
pub struct FulfillmentReport {
    pub order_id: String,
    pub status: OrderStatus,
    /// True when a previous attempt already settled the order and this call
    /// was an idempotent no-op.
    pub already_settled: bool,
    /// Steps that failed after payment was verified. The order is still
    /// fulfilled; these are owed goods, not refunds.
    pub partial_failures: Vec<CheckoutError>,
}

pub struct CheckoutService {
    config: StoreConfig,
    catalog: Arc<CatalogStore>,
    players: Arc<PlayerDirectory>,
    orders: Arc<OrderStore>,
    game: Arc<dyn GameGateway>,
    chain: Arc<dyn ChainGateway>,
    provider: Arc<dyn PaymentProvider>,
    rates: Arc<dyn ExchangeRateSource>,
    discount: Arc<DiscountCalculator>,
    pricing: PricingEngine,
    order_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CheckoutService {
    pub fn new(
        config: StoreConfig,
        db: Arc<sled::Db>,
        game: Arc<dyn GameGateway>,
        chain: Arc<dyn ChainGateway>,
        provider: Arc<dyn PaymentProvider>,
        rates: Arc<dyn ExchangeRateSource>,
    ) -> Result<Self, CheckoutError> {
        let catalog = Arc::new(CatalogStore::new(&db, config.hide_out_of_stock)?);
        let players = Arc::new(PlayerDirectory::new(&db)?);
        let orders = Arc::new(OrderStore::new(&db)?);
        let discount = Arc::new(DiscountCalculator::new(
            config.discount.clone(),
            chain.clone(),
        ));
        let pricing = PricingEngine::new(
            catalog.clone(),
            discount.clone(),
            game.clone(),
            players.clone(),
            config.ascension.clone(),
        );

        Ok(Self {
            config,
            catalog,
            players,
            orders,
            game,
            chain,
            provider,
            rates,
            discount,
            pricing,
            order_locks: AsyncMutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn players(&self) -> &PlayerDirectory {
        &self.players
    }

    pub fn orders(&self) -> &OrderStore {
        &self.orders
    }

    /// Offers for sale, optionally filtered by id.
    pub fn sales(&self, filter: Option<&BTreeSet<u64>>) -> Result<Vec<Offer>, CheckoutError> {
        self.catalog.list_offers(filter)
    }

    /// The holder discount for an address, in percentage points.
    pub async fn discount_for_address(&self, address: &str) -> Result<Decimal, CheckoutError> {
        self.discount.discount_for(address).await
    }

    /// Filter a player's item ids down to the ones that can ascend on the
    /// configured network.
    pub fn screen_items(&self, candidates: &[u64]) -> Result<Vec<u64>, CheckoutError> {
        self.catalog.screen_items(&self.config.network, candidates)
    }

    /// Price and validate a requested order without side effects.
    pub async fn price_order(
        &self,
        user: &UserContext,
        lines: &[OrderLine],
        purchaser: Option<&str>,
    ) -> Result<OrderManifest, CheckoutError> {
        self.pricing.price_order(user, lines, purchaser).await
    }

    /// The full checkout entry point: price, then open a payment transaction
    /// and durably record the pending order.
    pub async fn checkout(
        &self,
        user: &UserContext,
        lines: &[OrderLine],
        method: PaymentMethod,
        purchaser: Option<&str>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let manifest = self.pricing.price_order(user, lines, purchaser).await?;
        self.initiate_checkout(user, manifest, method, purchaser)
            .await
    }

    /// Open a payment transaction for an already priced manifest.
    #[tracing::instrument(skip(self, manifest, purchaser), fields(user_id = %user.user_id))]
    pub async fn initiate_checkout(
        &self,
        user: &UserContext,
        manifest: OrderManifest,
        method: PaymentMethod,
        purchaser: Option<&str>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if let Some(address) = purchaser {
            self.players.record_address(&user.user_id, address)?;
        }

        match method {
            PaymentMethod::Card => {
                let record =
                    OrderRecord::new_pending(user.user_id.clone(), PaymentMethod::Card, manifest)?;
                let draft = ProviderOrderDraft::from_manifest(
                    record.order_id.clone(),
                    self.config.brand.clone(),
                    self.config.currency.clone(),
                    &record.manifest,
                );

                // Provider first: a failed provider call must leave nothing
                // persisted.
                let provider_order_id = self
                    .provider
                    .create_order(&draft)
                    .await
                    .map_err(|e| CheckoutError::PaymentProviderError(e.to_string()))?;
                self.orders.create_pending(&record)?;

                info!(
                    order_id = %record.order_id,
                    %provider_order_id,
                    total = %record.total_cost,
                    "card checkout opened"
                );
                Ok(CheckoutOutcome::Card { provider_order_id })
            }
            PaymentMethod::Crypto => {
                let record = OrderRecord::new_pending(
                    user.user_id.clone(),
                    PaymentMethod::Crypto,
                    manifest,
                )?;
                // Persistence precedes the rate lookup: a failure past this
                // point leaves a pending order for reconciliation.
                self.orders.create_pending(&record)?;

                let rate = self
                    .rates
                    .fiat_per_coin(&self.config.currency)
                    .await
                    .map_err(|e| CheckoutError::PaymentProviderError(e.to_string()))?;
                let value = fiat_to_base_units(
                    record.total_cost,
                    rate,
                    self.config.crypto.base_unit_decimals,
                )?;
                let data = encode_purchase_call(
                    &self.config.crypto.purchase_selector,
                    PURCHASE_SERVICE_ID,
                    &record.order_id,
                )?;

                info!(
                    order_id = %record.order_id,
                    total = %record.total_cost,
                    value,
                    "crypto checkout opened"
                );
                Ok(CheckoutOutcome::Crypto {
                    order_id: record.order_id,
                    transaction: UnsignedTransaction {
                        nonce: 0,
                        gas_limit: self.config.crypto.gas_limit,
                        to: self.config.crypto.processor_address.clone(),
                        data,
                        value,
                    },
                })
            }
        }
    }

    /// Capture the provider transaction and fulfill the order it references.
    /// The order id is read back from the provider's own record, never from
    /// the client.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_and_fulfill(
        &self,
        provider_order_id: &str,
    ) -> Result<FulfillmentReport, CheckoutError> {
        let receipt = self
            .provider
            .capture(provider_order_id)
            .await
            .map_err(|e| {
                error!(%provider_order_id, %e, "provider capture failed");
                CheckoutError::PaymentProviderError(e.to_string())
            })?;

        self.apply_receipt(&receipt).await
    }

    /// Verify payment facts from a settled receipt and execute fulfillment.
    /// Also the entry point for reconciliation feeding receipts directly.
    pub async fn apply_receipt(
        &self,
        receipt: &ProviderReceipt,
    ) -> Result<FulfillmentReport, CheckoutError> {
        let order_id = receipt.reference_id.clone();

        // Serialize concurrent confirmations for the same order; the loser
        // observes the terminal record and no-ops.
        let lock = self.order_lock(&order_id).await;
        let _guard = lock.lock().await;
        let report = self.apply_receipt_locked(&order_id, receipt).await;
        drop(_guard);
        self.release_order_lock(&order_id, lock).await;
        report
    }

    async fn apply_receipt_locked(
        &self,
        order_id: &str,
        receipt: &ProviderReceipt,
    ) -> Result<FulfillmentReport, CheckoutError> {
        let Some(record) = self.orders.load(order_id)? else {
            error!(%order_id, "captured receipt references no stored order");
            return Err(CheckoutError::PaymentVerificationFailed(format!(
                "no stored order {order_id}"
            )));
        };

        if record.status.is_terminal() {
            info!(%order_id, status = ?record.status, "order already settled");
            return Ok(FulfillmentReport {
                order_id: record.order_id,
                status: record.status,
                already_settled: true,
                partial_failures: Vec::new(),
            });
        }

        if let Err(reason) = verify_receipt(&record, receipt, &self.config.currency) {
            warn!(%order_id, %reason, "payment verification failed");
            let raw = receipt.raw.to_string();
            let outcome = self.orders.settle(order_id, OrderStatus::Failed, Some(&raw))?;
            return Ok(report_from(outcome, Vec::new()));
        }

        // Payment is good. Resolve the mint target once, before any side
        // effect: a player with no linked address aborts here with the order
        // still pending, retryable once they link.
        let Some(address) = self.players.last_address(&record.user_id)? else {
            warn!(%order_id, user_id = %record.user_id, "no linked address, aborting fulfillment");
            return Err(CheckoutError::ZeroAddress);
        };

        let partial_failures = self.execute_side_effects(&record, &address).await;

        let raw = receipt.raw.to_string();
        let outcome = self
            .orders
            .settle(order_id, OrderStatus::Fulfilled, Some(&raw))?;
        info!(
            %order_id,
            partial_failures = partial_failures.len(),
            "order fulfilled"
        );
        Ok(report_from(outcome, partial_failures))
    }

    /// Debits and mints for a verified order. Each step fails independently:
    /// payment has already been taken, so a failed step is logged and owed,
    /// never a reason to withhold the rest.
    async fn execute_side_effects(
        &self,
        record: &OrderRecord,
        address: &str,
    ) -> Vec<CheckoutError> {
        let mut failures = Vec::new();
        let order_id = record.order_id.as_str();

        for (&item_id, &amount) in &record.manifest.ascension_items {
            if let Err(e) = self.game.debit_item(item_id, amount, &record.user_id).await {
                let failure = CheckoutError::FulfillmentPartialFailure {
                    step: format!("debit item {item_id} x{amount}"),
                    cause: e.to_string(),
                };
                error!(%order_id, %failure, "fulfillment step failed");
                failures.push(failure);
            }
        }

        for (&item_id, &amount) in &record.manifest.ascension_items {
            if let Err(failure) = self.mint_item(item_id, amount, address).await {
                error!(%order_id, %failure, "fulfillment step failed");
                failures.push(failure);
            }
        }

        for line in &record.manifest.lines {
            let LineSource::Catalog { offer_id } = line.source else {
                continue;
            };
            for entry in &line.contents {
                let to_mint = entry.amount_per_unit.saturating_mul(line.quantity);
                if to_mint == 0 {
                    continue;
                }
                match self.mint_item(entry.item_id, to_mint, address).await {
                    Ok(()) => {
                        // Stock comes off once the mint is accepted, not
                        // when it finally executes on chain.
                        if let Err(e) =
                            self.catalog.decrement_stock(offer_id, entry.item_id, to_mint)
                        {
                            let failure = CheckoutError::FulfillmentPartialFailure {
                                step: format!("decrement stock of offer {offer_id}"),
                                cause: e.to_string(),
                            };
                            error!(%order_id, %failure, "fulfillment step failed");
                            failures.push(failure);
                        }
                    }
                    Err(failure) => {
                        error!(%order_id, %failure, "fulfillment step failed");
                        failures.push(failure);
                    }
                }
            }
        }

        failures
    }

    async fn mint_item(
        &self,
        item_id: u64,
        amount: u64,
        address: &str,
    ) -> Result<(), CheckoutError> {
        let mapping = self
            .catalog
            .token_for_item(&self.config.network, item_id)
            .map_err(|e| CheckoutError::FulfillmentPartialFailure {
                step: format!("resolve token for item {item_id}"),
                cause: e.to_string(),
            })?
            .ok_or_else(|| CheckoutError::FulfillmentPartialFailure {
                step: format!("resolve token for item {item_id}"),
                cause: "no token mapping on this network".into(),
            })?;

        self.chain
            .mint(&mapping.token_id, address, amount)
            .await
            .map(|_| ())
            .map_err(|e| CheckoutError::FulfillmentPartialFailure {
                step: format!("mint token {} x{amount}", mapping.token_id),
                cause: e.to_string(),
            })
    }

    async fn order_lock(&self, order_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn release_order_lock(&self, order_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.order_locks.lock().await;
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(order_id);
        }
    }
}

/// The payment facts that make a receipt acceptable: settled, in the
/// expected currency, for at least the manifest total. Under-payment is a
/// hard failure; over-payment is accepted as-is.
fn verify_receipt(
    record: &OrderRecord,
    receipt: &ProviderReceipt,
    expected_currency: &str,
) -> Result<(), String> {
    match &receipt.state {
        SettlementState::Completed => {}
        SettlementState::Other(state) => {
            return Err(format!("settlement state is {state}"));
        }
    }
    if receipt.currency != expected_currency {
        return Err(format!(
            "settled in {} instead of {expected_currency}",
            receipt.currency
        ));
    }
    if receipt.amount < record.total_cost {
        return Err(format!(
            "settled amount {} is below the order total {}",
            receipt.amount, record.total_cost
        ));
    }
    Ok(())
}

fn report_from(outcome: SettlementOutcome, partial_failures: Vec<CheckoutError>) -> FulfillmentReport {
    match outcome {
        SettlementOutcome::Applied(record) => FulfillmentReport {
            order_id: record.order_id,
            status: record.status,
            already_settled: false,
            partial_failures,
        },
        SettlementOutcome::AlreadySettled(record) => FulfillmentReport {
            order_id: record.order_id,
            status: record.status,
            already_settled: true,
            partial_failures: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::order::{OrderManifest, PaymentMethod};
    use std::collections::BTreeMap;

    fn record(total: &str) -> OrderRecord {
        OrderRecord::new_pending(
            "user-1".into(),
            PaymentMethod::Card,
            OrderManifest {
                lines: vec![],
                discount_multiplier: "1".parse().unwrap(),
                total_cost: total.parse().unwrap(),
                ascension_items: BTreeMap::new(),
            },
        )
        .unwrap()
    }

    fn receipt(state: SettlementState, currency: &str, amount: &str) -> ProviderReceipt {
        ProviderReceipt {
            reference_id: "ref".into(),
            state,
            currency: currency.into(),
            amount: amount.parse::<Money>().unwrap(),
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn underpayment_is_a_hard_failure() {
        let rec = record("4.00");
        let rcpt = receipt(SettlementState::Completed, "USD", "3.99");

        assert!(verify_receipt(&rec, &rcpt, "USD").is_err());
    }

    #[test]
    fn overpayment_is_accepted_silently() {
        let rec = record("4.00");
        let rcpt = receipt(SettlementState::Completed, "USD", "4.50");

        assert!(verify_receipt(&rec, &rcpt, "USD").is_ok());
    }

    #[test]
    fn wrong_currency_fails_verification() {
        let rec = record("4.00");
        let rcpt = receipt(SettlementState::Completed, "EUR", "4.00");

        assert!(verify_receipt(&rec, &rcpt, "USD").is_err());
    }

    #[test]
    fn unsettled_state_fails_verification() {
        let rec = record("4.00");
        let rcpt = receipt(SettlementState::Other("DECLINED".into()), "USD", "4.00");

        assert!(verify_receipt(&rec, &rcpt, "USD").is_err());
    }
}
