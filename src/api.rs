//! Wire-facing request and response shapes for the storefront surface.
//!
//! HTTP routing is out of scope for this crate; the plumbing deserializes
//! these, calls [`crate::checkout::CheckoutService`], and renders whatever
//! comes back. Failures use the closed set of user-visible messages;
//! internal causes stay in the server logs.
use crate::catalog::Offer;
use crate::checkout::{CheckoutOutcome, FulfillmentReport};
use crate::error::CheckoutError;
use crate::order::{OrderLine, OrderStatus, PaymentMethod};
use crate::payment::UnsignedTransaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiStatus {
    Success,
    Error,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: ApiStatus,
    pub message: String,
}

impl From<&CheckoutError> for ErrorBody {
    fn from(error: &CheckoutError) -> Self {
        Self {
            status: ApiStatus::Error,
            message: error.user_message().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRequest {
    #[serde(default)]
    pub offer_id_filter: Option<Vec<u64>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SalesResponse {
    Success {
        status: ApiStatus,
        offers: Vec<Offer>,
    },
    Error(ErrorBody),
}

impl SalesResponse {
    pub fn from_result(result: Result<Vec<Offer>, CheckoutError>) -> Self {
        match result {
            Ok(offers) => SalesResponse::Success {
                status: ApiStatus::Success,
                offers,
            },
            Err(error) => SalesResponse::Error((&error).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DiscountResponse {
    Success { status: ApiStatus, discount: Decimal },
    Error(ErrorBody),
}

impl DiscountResponse {
    pub fn from_result(result: Result<Decimal, CheckoutError>) -> Self {
        match result {
            Ok(discount) => DiscountResponse::Success {
                status: ApiStatus::Success,
                discount,
            },
            Err(error) => DiscountResponse::Error((&error).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub requested_services: Vec<OrderLine>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub purchaser: Option<String>,
}

/// Checkout responses differ by rail: the card rail hands the provider's
/// transaction id to the payment UI, the crypto rail hands back an unsigned
/// transaction to sign and broadcast.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CheckoutResponse {
    Card {
        #[serde(rename = "orderID")]
        order_id: String,
    },
    Crypto(UnsignedTransaction),
    Error(ErrorBody),
}

impl CheckoutResponse {
    pub fn from_result(result: Result<CheckoutOutcome, CheckoutError>) -> Self {
        match result {
            Ok(CheckoutOutcome::Card { provider_order_id }) => CheckoutResponse::Card {
                order_id: provider_order_id,
            },
            Ok(CheckoutOutcome::Crypto { transaction, .. }) => {
                CheckoutResponse::Crypto(transaction)
            }
            Err(error) => CheckoutResponse::Error((&error).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(rename = "orderID")]
    pub order_id: String,
}

/// HTTP status the approval endpoint answers with: 200 once fulfilled, 400
/// when payment verification fails (or no address is linked), 500 when the
/// provider call itself fails.
pub fn approve_status(result: &Result<FulfillmentReport, CheckoutError>) -> u16 {
    match result {
        Ok(report) => match report.status {
            OrderStatus::Fulfilled => 200,
            _ => 400,
        },
        Err(CheckoutError::ZeroAddress | CheckoutError::PaymentVerificationFailed(_)) => 400,
        Err(_) => 500,
    }
}
