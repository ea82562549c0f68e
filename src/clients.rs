//! HTTP adapters for the remote collaborators: the game backend (REST), the
//! chain token platform (GraphQL over HTTP), the card payment provider, and
//! the exchange-rate feed.
//!
//! Admin tokens live in an [`AdminCredentials`] context owned by each client
//! and injected at construction; the bootstrap that logs in and refreshes
//! them is out of scope here.
use crate::gateway::{ChainGateway, GameGateway, GatewayError, ItemHolding, MintState, TokenHolding};
use crate::money::Money;
use crate::payment::{
    ExchangeRateSource, PaymentProvider, ProviderOrderDraft, ProviderReceipt, SettlementState,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A refreshable admin bearer token. Holders share it behind an `Arc`; the
/// credential refresher swaps the token in place while requests keep
/// flowing.
pub struct AdminCredentials {
    token: RwLock<String>,
}

impl AdminCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    pub async fn bearer(&self) -> String {
        self.token.read().await.clone()
    }

    pub async fn refresh(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[derive(Debug, Clone)]
pub struct GameEndpoints {
    pub inventory_uri: String,
    pub remove_item_uri: String,
}

/// REST client for the game backend. Inventory reads run under the player's
/// own token; debits run under the admin credential with the player as
/// recipient.
pub struct GameHttpClient {
    http: reqwest::Client,
    endpoints: GameEndpoints,
    admin: Arc<AdminCredentials>,
}

impl GameHttpClient {
    pub fn new(
        endpoints: GameEndpoints,
        admin: Arc<AdminCredentials>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: build_http(timeout)?,
            endpoints,
            admin,
        })
    }
}

#[derive(serde::Deserialize)]
struct InventoryEnvelope {
    inventory: Vec<ItemHolding>,
}

#[async_trait]
impl GameGateway for GameHttpClient {
    async fn inventory(&self, user_token: &str) -> Result<Vec<ItemHolding>, GatewayError> {
        let envelope: InventoryEnvelope = self
            .http
            .get(&self.endpoints.inventory_uri)
            .bearer_auth(user_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope.inventory)
    }

    async fn debit_item(
        &self,
        item_id: u64,
        amount: u64,
        recipient_user_id: &str,
    ) -> Result<(), GatewayError> {
        let body = json!({
            "itemId": item_id,
            "amount": amount,
            "recipientId": recipient_user_id,
        });

        self.http
            .post(&self.endpoints.remove_item_uri)
            .bearer_auth(self.admin.bearer().await)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;

        Ok(())
    }
}

const INVENTORY_QUERY: &str = "\
query Inventory($address: String!) {
  balances(address: $address) { tokenId balance metadataUri }
}";

const BALANCE_QUERY: &str = "\
query TokenBalance($address: String!, $tokenId: String!) {
  balance(address: $address, tokenId: $tokenId) { amount }
}";

const MINT_MUTATION: &str = "\
mutation Mint($tokenId: String!, $address: String!, $amount: Int!) {
  mintToken(tokenId: $tokenId, recipient: $address, amount: $amount) { state }
}";

/// GraphQL-over-HTTP client for the token platform.
pub struct PlatformChainClient {
    http: reqwest::Client,
    platform_url: String,
    app_id: String,
    admin: Arc<AdminCredentials>,
}

impl PlatformChainClient {
    pub fn new(
        platform_url: String,
        app_id: String,
        admin: Arc<AdminCredentials>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: build_http(timeout)?,
            platform_url,
            app_id,
            admin,
        })
    }

    async fn post_graphql(&self, query: &str, variables: Value) -> Result<Value, GatewayError> {
        let body = json!({ "query": query, "variables": variables });
        let response: Value = self
            .http
            .post(&self.platform_url)
            .bearer_auth(self.admin.bearer().await)
            .header("X-App-Id", &self.app_id)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(message) = response["errors"][0]["message"].as_str() {
            return Err(GatewayError::Rejected(message.to_string()));
        }
        Ok(response["data"].clone())
    }
}

#[async_trait]
impl ChainGateway for PlatformChainClient {
    async fn inventory(&self, address: &str) -> Result<Vec<TokenHolding>, GatewayError> {
        let data = self
            .post_graphql(INVENTORY_QUERY, json!({ "address": address }))
            .await?;

        serde_json::from_value(data["balances"].clone())
            .map_err(|e| GatewayError::Protocol(format!("balances: {e}")))
    }

    async fn token_balance(&self, address: &str, token_id: &str) -> Result<u64, GatewayError> {
        let data = self
            .post_graphql(
                BALANCE_QUERY,
                json!({ "address": address, "tokenId": token_id }),
            )
            .await?;

        data["balance"]["amount"]
            .as_u64()
            .ok_or_else(|| GatewayError::Protocol("balance amount missing".into()))
    }

    async fn mint(
        &self,
        token_id: &str,
        address: &str,
        amount: u64,
    ) -> Result<MintState, GatewayError> {
        let data = self
            .post_graphql(
                MINT_MUTATION,
                json!({ "tokenId": token_id, "address": address, "amount": amount }),
            )
            .await?;

        let state = data["mintToken"]["state"]
            .as_str()
            .ok_or_else(|| GatewayError::Protocol("mint state missing".into()))?;

        Ok(match state {
            "PENDING" => MintState::Pending,
            "BROADCAST" => MintState::Broadcast,
            "EXECUTED" => MintState::Executed,
            other => MintState::Other(other.to_string()),
        })
    }
}

/// REST client for the card payment provider's order API.
pub struct RestCardProvider {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl RestCardProvider {
    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url,
            client_id,
            client_secret,
        })
    }
}

fn provider_amount(money: Money) -> String {
    let mut amount = money.rounded().0;
    amount.rescale(2);
    amount.to_string()
}

#[async_trait]
impl PaymentProvider for RestCardProvider {
    async fn create_order(&self, draft: &ProviderOrderDraft) -> Result<String, GatewayError> {
        let items: Vec<Value> = draft
            .items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "description": item.description,
                    "unit_amount": {
                        "currency_code": draft.currency,
                        "value": provider_amount(item.unit_price),
                    },
                    "quantity": item.quantity.to_string(),
                    "category": "DIGITAL_GOODS",
                })
            })
            .collect();

        let body = json!({
            "intent": "CAPTURE",
            "application_context": { "brand_name": draft.brand },
            "purchase_units": [{
                "reference_id": draft.reference_id,
                "amount": {
                    "currency_code": draft.currency,
                    "value": provider_amount(draft.total),
                    "breakdown": {
                        "item_total": {
                            "currency_code": draft.currency,
                            "value": provider_amount(draft.total),
                        }
                    }
                },
                "items": items,
            }],
        });

        let response: Value = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Protocol("provider order id missing".into()))
    }

    async fn capture(&self, provider_order_id: &str) -> Result<ProviderReceipt, GatewayError> {
        let raw: Value = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{provider_order_id}/capture",
                self.base_url
            ))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let unit = &raw["purchase_units"][0];
        let reference_id = unit["reference_id"]
            .as_str()
            .ok_or_else(|| GatewayError::Protocol("capture reference id missing".into()))?
            .to_string();

        let capture = &unit["payments"]["captures"][0];
        let state = match capture["status"].as_str() {
            Some("COMPLETED") => SettlementState::Completed,
            Some(other) => SettlementState::Other(other.to_string()),
            None => return Err(GatewayError::Protocol("capture status missing".into())),
        };
        let currency = capture["amount"]["currency_code"]
            .as_str()
            .ok_or_else(|| GatewayError::Protocol("capture currency missing".into()))?
            .to_string();
        let amount = capture["amount"]["value"]
            .as_str()
            .and_then(|value| Decimal::from_str(value).ok())
            .map(Money)
            .ok_or_else(|| GatewayError::Protocol("capture amount missing".into()))?;

        Ok(ProviderReceipt {
            reference_id,
            state,
            currency,
            amount,
            raw,
        })
    }
}

/// Exchange-rate feed returning units of fiat per whole coin.
pub struct HttpExchangeRate {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpExchangeRate {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            http: build_http(timeout)?,
            endpoint,
        })
    }
}

#[derive(serde::Deserialize)]
struct RateEnvelope {
    rate: Decimal,
}

#[async_trait]
impl ExchangeRateSource for HttpExchangeRate {
    async fn fiat_per_coin(&self, currency: &str) -> Result<Decimal, GatewayError> {
        let envelope: RateEnvelope = self
            .http
            .get(&self.endpoint)
            .query(&[("currency", currency)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope.rate)
    }
}
