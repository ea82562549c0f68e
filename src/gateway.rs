//! Contracts for the remote collaborators the orchestrator depends on: the
//! game backend holding item inventories and the chain platform holding
//! token balances and the mint queue. Each operation fails independently;
//! callers decide which failures degrade and which abort.
use async_trait::async_trait;

/// The identity the out-of-scope login plumbing hands to the core: the
/// player's stable id plus their own session token, which inventory reads
/// are performed under.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub game_token: String,
}

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Protocol(String),
    #[error("remote rejected the operation: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        GatewayError::Transport(value.to_string())
    }
}

/// One game-side item balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemHolding {
    pub item_id: u64,
    pub amount: u64,
}

/// One chain-side token balance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHolding {
    pub token_id: String,
    pub balance: u64,
    pub metadata_uri: Option<String>,
}

/// State the platform reports for an accepted mint mutation. Any `Ok` from
/// [`ChainGateway::mint`] means the mutation was accepted, not that minting
/// finished; `Pending` is the normal answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintState {
    Pending,
    Broadcast,
    Executed,
    Other(String),
}

#[async_trait]
pub trait GameGateway: Send + Sync {
    /// Live item balances for the player, read under their own token.
    async fn inventory(&self, user_token: &str) -> Result<Vec<ItemHolding>, GatewayError>;

    /// Remove items from a player's inventory. The backend does not
    /// guarantee idempotency; issue at most one call per logical debit.
    async fn debit_item(
        &self,
        item_id: u64,
        amount: u64,
        recipient_user_id: &str,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn inventory(&self, address: &str) -> Result<Vec<TokenHolding>, GatewayError>;

    async fn token_balance(&self, address: &str, token_id: &str) -> Result<u64, GatewayError>;

    /// Queue a mint of `amount` units of `token_id` to `address`.
    async fn mint(
        &self,
        token_id: &str,
        address: &str,
        amount: u64,
    ) -> Result<MintState, GatewayError>;
}
