//! Shared fixtures for the integration tests: in-memory gateways, a
//! scripted payment provider, and configuration builders.
#![allow(dead_code)]

use ascension_checkout::catalog::{BundleEntry, Offer, OfferMetadata};
use ascension_checkout::checkout::CheckoutService;
use ascension_checkout::config::{AscensionConfig, CryptoConfig, DiscountConfig, StoreConfig};
use ascension_checkout::gateway::{
    ChainGateway, GameGateway, GatewayError, ItemHolding, MintState, TokenHolding, UserContext,
};
use ascension_checkout::money::Money;
use ascension_checkout::payment::{
    ExchangeRateSource, PaymentProvider, ProviderOrderDraft, ProviderReceipt, SettlementState,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct MockGame {
    pub holdings: Mutex<BTreeMap<u64, u64>>,
    pub debits: Mutex<Vec<(u64, u64, String)>>,
    pub fail_debits: AtomicBool,
}

impl MockGame {
    pub fn with_holdings(holdings: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            holdings: Mutex::new(holdings.into_iter().collect()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl GameGateway for MockGame {
    async fn inventory(&self, _user_token: &str) -> Result<Vec<ItemHolding>, GatewayError> {
        Ok(self
            .holdings
            .lock()
            .unwrap()
            .iter()
            .map(|(&item_id, &amount)| ItemHolding { item_id, amount })
            .collect())
    }

    async fn debit_item(
        &self,
        item_id: u64,
        amount: u64,
        recipient_user_id: &str,
    ) -> Result<(), GatewayError> {
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("debit refused".into()));
        }
        self.debits
            .lock()
            .unwrap()
            .push((item_id, amount, recipient_user_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockChain {
    pub balance: Mutex<u64>,
    pub mints: Mutex<Vec<(String, String, u64)>>,
    pub fail_balance: AtomicBool,
    pub fail_mint: AtomicBool,
}

impl MockChain {
    pub fn with_balance(balance: u64) -> Self {
        Self {
            balance: Mutex::new(balance),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn inventory(&self, _address: &str) -> Result<Vec<TokenHolding>, GatewayError> {
        Ok(Vec::new())
    }

    async fn token_balance(&self, _address: &str, _token_id: &str) -> Result<u64, GatewayError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("rpc timeout".into()));
        }
        Ok(*self.balance.lock().unwrap())
    }

    async fn mint(
        &self,
        token_id: &str,
        address: &str,
        amount: u64,
    ) -> Result<MintState, GatewayError> {
        if self.fail_mint.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("mint refused".into()));
        }
        self.mints
            .lock()
            .unwrap()
            .push((token_id.to_string(), address.to_string(), amount));
        Ok(MintState::Pending)
    }
}

/// The payment facts the provider will report on capture. `amount: None`
/// echoes the draft total, i.e. the buyer paid exactly what was asked.
pub struct ScriptedSettlement {
    pub state: SettlementState,
    pub currency: String,
    pub amount: Option<Money>,
}

pub struct MockProvider {
    pub created: Mutex<Vec<ProviderOrderDraft>>,
    pub captures: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub settlement: Mutex<ScriptedSettlement>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            captures: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            settlement: Mutex::new(ScriptedSettlement {
                state: SettlementState::Completed,
                currency: "USD".into(),
                amount: None,
            }),
        }
    }
}

impl MockProvider {
    pub fn settle_amount(&self, amount: &str) {
        self.settlement.lock().unwrap().amount = Some(amount.parse().unwrap());
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_order(&self, draft: &ProviderOrderDraft) -> Result<String, GatewayError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("provider down".into()));
        }
        let provider_order_id = format!("prov-{}", draft.reference_id);
        self.created.lock().unwrap().push(draft.clone());
        Ok(provider_order_id)
    }

    async fn capture(&self, provider_order_id: &str) -> Result<ProviderReceipt, GatewayError> {
        self.captures
            .lock()
            .unwrap()
            .push(provider_order_id.to_string());

        let reference_id = provider_order_id
            .strip_prefix("prov-")
            .unwrap_or(provider_order_id)
            .to_string();
        let created = self.created.lock().unwrap();
        let draft = created
            .iter()
            .find(|draft| draft.reference_id == reference_id)
            .ok_or_else(|| GatewayError::Rejected("unknown provider order".into()))?;

        let script = self.settlement.lock().unwrap();
        Ok(ProviderReceipt {
            reference_id,
            state: script.state.clone(),
            currency: script.currency.clone(),
            amount: script.amount.unwrap_or(draft.total),
            raw: serde_json::json!({ "mock": "capture" }),
        })
    }
}

pub struct MockRates(pub Decimal);

#[async_trait]
impl ExchangeRateSource for MockRates {
    async fn fiat_per_coin(&self, _currency: &str) -> Result<Decimal, GatewayError> {
        Ok(self.0)
    }
}

pub fn test_config(ascension_enabled: bool, discount_enabled: bool) -> StoreConfig {
    StoreConfig {
        brand: "Ascension Store".into(),
        currency: "USD".into(),
        hide_out_of_stock: false,
        network: "testnet".into(),
        ascension: AscensionConfig {
            enabled: ascension_enabled,
            cost: "1.50".parse().unwrap(),
            description: "Convert game-only items into chain tokens".into(),
        },
        discount: DiscountConfig {
            enabled: discount_enabled,
            token_id: "0xd15c".into(),
            rate_per_token: Decimal::ONE,
            cap: Decimal::from(20),
        },
        crypto: CryptoConfig {
            processor_address: "0x00000000000000000000000000000000c0ffee00".into(),
            purchase_selector: "0x0f574ba7".into(),
            gas_limit: 3_000_000,
            base_unit_decimals: 18,
        },
    }
}

pub fn offer(offer_id: u64, price: &str, entries: &[(u64, u64, u64)]) -> Offer {
    Offer {
        offer_id,
        price: price.parse().unwrap(),
        metadata: OfferMetadata {
            name: format!("Bundle {offer_id}"),
            description: "A bundle of goods".into(),
            image: String::new(),
        },
        contents: entries
            .iter()
            .map(
                |&(item_id, amount_per_unit, available_for_purchase)| BundleEntry {
                    item_id,
                    amount_per_unit,
                    available_for_purchase,
                },
            )
            .collect(),
    }
}

pub fn player() -> UserContext {
    UserContext {
        user_id: "player-1".into(),
        game_token: "session-token".into(),
    }
}

pub struct Harness {
    pub service: CheckoutService,
    pub game: Arc<MockGame>,
    pub chain: Arc<MockChain>,
    pub provider: Arc<MockProvider>,
    _temp_dir: tempfile::TempDir,
}

/// Each test gets its own sled database on temp, same as any other test
/// against file-locked storage.
pub fn harness(
    config: StoreConfig,
    game: MockGame,
    chain: MockChain,
) -> anyhow::Result<Harness> {
    let temp_dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("store.db"))?);

    let game = Arc::new(game);
    let chain = Arc::new(chain);
    let provider = Arc::new(MockProvider::default());
    let rates = Arc::new(MockRates(Decimal::from(2000)));

    let service = CheckoutService::new(
        config,
        db,
        game.clone(),
        chain.clone(),
        provider.clone(),
        rates,
    )?;

    Ok(Harness {
        service,
        game,
        chain,
        provider,
        _temp_dir: temp_dir,
    })
}
