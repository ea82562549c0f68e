//! Payment rail contracts: the card provider transaction surface and the
//! unsigned-transaction descriptor for the crypto rail.
//!
//! The orchestrator never holds a buyer key and never settles anything
//! itself; on the card rail it opens and captures provider transactions, on
//! the crypto rail it only encodes intent for the client to sign.
use crate::error::CheckoutError;
use crate::money::Money;
use crate::order::OrderManifest;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::gateway::GatewayError;

/// Provider-facing cap on item descriptions.
const DESCRIPTION_LIMIT: usize = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLineItem {
    pub name: String,
    pub description: String,
    /// Rounded for display; the settled total is checked against the
    /// manifest, not against these.
    pub unit_price: Money,
    pub quantity: u64,
}

/// What the card provider is asked to open a transaction for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrderDraft {
    /// Our order id; read back from the provider's own record on capture.
    pub reference_id: String,
    pub brand: String,
    pub currency: String,
    pub total: Money,
    pub items: Vec<ProviderLineItem>,
}

impl ProviderOrderDraft {
    /// Describe a priced manifest to the provider: line name, quantity, and
    /// unit price per line, plus the manifest total.
    pub fn from_manifest(
        reference_id: String,
        brand: String,
        currency: String,
        manifest: &OrderManifest,
    ) -> Self {
        let items = manifest
            .lines
            .iter()
            .map(|line| ProviderLineItem {
                name: line.name.clone(),
                description: truncate(&line.description, DESCRIPTION_LIMIT),
                unit_price: line.unit_price.rounded(),
                quantity: line.quantity,
            })
            .collect();

        Self {
            reference_id,
            brand,
            currency,
            total: manifest.total_cost,
            items,
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementState {
    Completed,
    Other(String),
}

/// The payment facts fulfillment verifies: settlement state, currency, and
/// the settled amount, plus the provider's raw payload for audit.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    /// Our order id as recorded by the provider itself, never client-supplied.
    pub reference_id: String,
    pub state: SettlementState,
    pub currency: String,
    pub amount: Money,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Open a provider transaction; returns the provider's transaction id
    /// for the client-side payment UI.
    async fn create_order(&self, draft: &ProviderOrderDraft) -> Result<String, GatewayError>;

    /// Capture a previously approved transaction and report its settlement
    /// facts.
    async fn capture(&self, provider_order_id: &str) -> Result<ProviderReceipt, GatewayError>;
}

#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Units of `currency` per one whole coin of the chain's currency.
    async fn fiat_per_coin(&self, currency: &str) -> Result<Decimal, GatewayError>;
}

/// Unsigned transaction descriptor returned to the client on the crypto
/// rail: target contract, encoded call data referencing the order, and the
/// value in base units.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    #[serde(rename = "gasLimit")]
    pub gas_limit: u64,
    pub to: String,
    pub data: String,
    pub value: u128,
}

/// Encode the processor contract's purchase call: the configured four-byte
/// selector, the service id as a uint256, and the order id's uuid bytes
/// right-padded to a word.
pub fn encode_purchase_call(
    selector: &str,
    service_id: u64,
    order_id: &str,
) -> Result<String, CheckoutError> {
    let selector = hex::decode(selector.trim_start_matches("0x"))
        .map_err(|e| CheckoutError::Codec(format!("bad purchase selector: {e}")))?;
    if selector.len() != 4 {
        return Err(CheckoutError::Codec(
            "purchase selector must be four bytes".into(),
        ));
    }

    let uuid_bytes = hex::decode(order_id.replace('-', ""))
        .map_err(|e| CheckoutError::Codec(format!("order id is not a uuid: {e}")))?;
    if uuid_bytes.len() != 16 {
        return Err(CheckoutError::Codec("order id is not a uuid".into()));
    }

    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&[0u8; 24]);
    data.extend_from_slice(&service_id.to_be_bytes());
    data.extend_from_slice(&uuid_bytes);
    data.extend_from_slice(&[0u8; 16]);

    Ok(format!("0x{}", hex::encode(data)))
}

/// Convert a fiat total into the chain's base unit at the given rate.
pub fn fiat_to_base_units(
    total: Money,
    fiat_per_coin: Decimal,
    base_unit_decimals: u32,
) -> Result<u128, CheckoutError> {
    use rust_decimal::prelude::ToPrimitive;

    if fiat_per_coin <= Decimal::ZERO {
        return Err(CheckoutError::PaymentProviderError(
            "exchange rate must be positive".into(),
        ));
    }

    let out_of_range = || {
        CheckoutError::PaymentProviderError("converted value exceeds the base unit range".into())
    };

    let mut scaled = total.amount() / fiat_per_coin;
    for _ in 0..base_unit_decimals {
        scaled = scaled
            .checked_mul(Decimal::from(10u64))
            .ok_or_else(out_of_range)?;
    }

    scaled.trunc().to_u128().ok_or_else(out_of_range)
}
