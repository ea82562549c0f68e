//! Error kinds for pricing, checkout, and fulfillment.

/// Everything the orchestrator can fail with. Validation and pricing kinds
/// are returned synchronously and never partially mutate state; provider and
/// store kinds are internal and surface to users as a generic message.
#[derive(thiserror::Error, Debug)]
pub enum CheckoutError {
    #[error("offer catalog could not be reached: {0}")]
    CatalogUnavailable(String),
    #[error("discount lookup failed: {0}")]
    DiscountUnavailable(String),
    #[error("inventory gateway failure: {0}")]
    InventoryUnavailable(String),
    #[error("order references unknown offer {0}")]
    UnknownOffer(u64),
    #[error("offer {offer_id} cannot cover item {item_id} from available stock")]
    OutOfStock { offer_id: u64, item_id: u64 },
    #[error("ascension of item {item_id} exceeds the amount owned")]
    InsufficientInventory { item_id: u64 },
    #[error("ascension request contains no positive entries")]
    EmptyAscensionRequest,
    #[error("ascension is not enabled")]
    AscensionDisabled,
    #[error("payment provider call failed: {0}")]
    PaymentProviderError(String),
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),
    #[error("player has not linked a payable chain address")]
    ZeroAddress,
    #[error("fulfillment step failed after payment was verified: {step}: {cause}")]
    FulfillmentPartialFailure { step: String, cause: String },
    #[error("order {0} already exists")]
    DuplicateOrder(String),
    #[error("order store failure: {0}")]
    Store(#[from] sled::Error),
    #[error("stored record could not be decoded: {0}")]
    Codec(String),
}

impl CheckoutError {
    /// The closed set of user-visible messages. Internal failures (store,
    /// provider outages, codec) collapse to a generic message and are only
    /// detailed in server-side logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            CheckoutError::UnknownOffer(_) => "an item in your order is not for sale",
            CheckoutError::OutOfStock { .. } => "an item in your order is out of stock",
            CheckoutError::InsufficientInventory { .. } => {
                "you do not own enough of an item you are trying to ascend"
            }
            CheckoutError::EmptyAscensionRequest => "no items were chosen for ascension",
            CheckoutError::AscensionDisabled => "ascension is not available right now",
            CheckoutError::ZeroAddress => "link a wallet address before purchasing",
            CheckoutError::DiscountUnavailable(_) => "your discount could not be determined",
            CheckoutError::PaymentVerificationFailed(_) => "your payment could not be verified",
            CheckoutError::CatalogUnavailable(_)
            | CheckoutError::InventoryUnavailable(_)
            | CheckoutError::PaymentProviderError(_)
            | CheckoutError::FulfillmentPartialFailure { .. }
            | CheckoutError::DuplicateOrder(_)
            | CheckoutError::Store(_)
            | CheckoutError::Codec(_) => "we were unable to complete your order",
        }
    }
}

impl From<minicbor::decode::Error> for CheckoutError {
    fn from(value: minicbor::decode::Error) -> Self {
        CheckoutError::Codec(value.to_string())
    }
}

impl From<minicbor::encode::Error<core::convert::Infallible>> for CheckoutError {
    fn from(value: minicbor::encode::Error<core::convert::Infallible>) -> Self {
        CheckoutError::Codec(value.to_string())
    }
}
