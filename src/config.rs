//! Configuration injected by the host process.
//!
//! The crate performs no environment or file loading itself; bootstrap hands
//! a fully built [`StoreConfig`] to [`crate::checkout::CheckoutService`].
use crate::money::Money;
use rust_decimal::Decimal;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StoreConfig {
    /// Store name shown on provider payment screens.
    pub brand: String,
    /// Fiat currency code expected from the card provider, e.g. "USD".
    pub currency: String,
    /// Omit offers whose every bundle entry is at zero stock from listings.
    pub hide_out_of_stock: bool,
    /// Network suffix the item-to-token mapping table is keyed under.
    pub network: String,
    pub ascension: AscensionConfig,
    pub discount: DiscountConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AscensionConfig {
    pub enabled: bool,
    /// Flat cost per distinct ascended item.
    pub cost: Money,
    pub description: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscountConfig {
    pub enabled: bool,
    /// Chain token whose balance earns the discount.
    pub token_id: String,
    /// Percentage points granted per token held.
    pub rate_per_token: Decimal,
    /// Ceiling in percentage points.
    pub cap: Decimal,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CryptoConfig {
    /// Payment processor contract the unsigned transaction targets.
    pub processor_address: String,
    /// Four-byte selector of the processor's purchase entry point, 0x-hex.
    pub purchase_selector: String,
    pub gas_limit: u64,
    /// Base units per whole coin, as a power of ten (18 for wei).
    pub base_unit_decimals: u32,
}
