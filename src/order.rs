//! Order lines, the priced manifest, and the persisted order records.
//!
//! An order record is created atomically as `Pending` when a payment
//! transaction is opened and its status is mutated exactly once, to a
//! terminal state, by fulfillment. Every transition is also appended to the
//! record's history, which is audit data and never rewritten.
use crate::catalog::BundleEntry;
use crate::error::CheckoutError;
use crate::money::Money;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use uuid7::uuid7;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }

    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One requested line of a checkout, before pricing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderLine {
    #[serde(rename_all = "camelCase")]
    Catalog { offer_id: u64, amount: u64 },
    /// Item id to requested amount. A pseudo-offer with no catalog price;
    /// validity is judged against the player's live game inventory.
    Ascension { items: BTreeMap<u64, u64> },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineSource {
    #[n(0)]
    #[serde(rename_all = "camelCase")]
    Catalog {
        #[n(0)]
        offer_id: u64,
    },
    #[n(1)]
    Ascension,
}

/// One validated, discount-applied line of the manifest. Catalog lines carry
/// a snapshot of the bundle contents taken at validation time; fulfillment
/// mints from the snapshot, not from the live catalog.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    #[n(0)]
    pub source: LineSource,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub description: String,
    /// Discount applied, full precision. Rounding happens on `line_total`.
    #[n(3)]
    pub unit_price: Money,
    #[n(4)]
    pub quantity: u64,
    /// `unit_price × quantity`, rounded to two decimals.
    #[n(5)]
    pub line_total: Money,
    #[n(6)]
    pub contents: Vec<BundleEntry>,
}

/// The server-trusted description of what a checkout will purchase.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderManifest {
    #[n(0)]
    pub lines: Vec<PricedLine>,
    /// In (0, 1]; already folded into every line's unit price.
    #[n(1)]
    pub discount_multiplier: Money,
    /// Sum of the rounded line totals.
    #[n(2)]
    pub total_cost: Money,
    /// Item id to amount debited from the game inventory on fulfillment.
    #[n(3)]
    pub ascension_items: BTreeMap<u64, u64>,
}

impl OrderManifest {
    /// Serialise the manifest and derive its content hash. The hash is
    /// stored with the order record so audits can prove which manifest a
    /// payment settled against.
    pub fn finalise(&self) -> Result<(String, Vec<u8>), CheckoutError> {
        let contents = minicbor::to_vec(self)?;
        let hash = sha256::digest(&contents);

        Ok((hash, contents))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[n(0)]
    Card,
    #[n(1)]
    Crypto,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Fulfilled,
    #[n(2)]
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// One entry of the append-only status history. Terminal entries carry the
/// raw provider receipt for audit.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StatusEntry {
    #[n(0)]
    pub at: TimeStamp<Utc>,
    #[n(1)]
    pub status: OrderStatus,
    #[n(2)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OrderRecord {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub payment_method: PaymentMethod,
    #[n(3)]
    pub total_cost: Money,
    #[n(4)]
    pub manifest: OrderManifest,
    #[n(5)]
    pub manifest_hash: String,
    #[n(6)]
    pub status: OrderStatus,
    #[n(7)]
    pub history: Vec<StatusEntry>,
}

impl OrderRecord {
    /// A fresh `Pending` record keyed by a newly generated order id. The id
    /// doubles as the payment provider's reference and must be unguessable
    /// and unique per attempt, which the time-ordered uuid gives us.
    pub fn new_pending(
        user_id: String,
        payment_method: PaymentMethod,
        manifest: OrderManifest,
    ) -> Result<Self, CheckoutError> {
        let (manifest_hash, _) = manifest.finalise()?;

        Ok(Self {
            order_id: uuid7().to_string(),
            user_id,
            payment_method,
            total_cost: manifest.total_cost,
            manifest,
            manifest_hash,
            status: OrderStatus::Pending,
            history: vec![StatusEntry {
                at: TimeStamp::new(),
                status: OrderStatus::Pending,
                receipt: None,
            }],
        })
    }
}

/// Result of a terminal transition attempt.
#[derive(Debug)]
pub enum SettlementOutcome {
    /// This caller performed the transition.
    Applied(OrderRecord),
    /// Another caller already settled the order; side effects must not run.
    AlreadySettled(OrderRecord),
}

pub struct OrderStore {
    tree: sled::Tree,
}

impl OrderStore {
    pub fn new(db: &sled::Db) -> Result<Self, CheckoutError> {
        Ok(Self {
            tree: db.open_tree("orders")?,
        })
    }

    /// Atomic insert of a fresh `Pending` record. The insert is flushed
    /// before returning so an approval callback can always resolve the id.
    pub fn create_pending(&self, record: &OrderRecord) -> Result<(), CheckoutError> {
        let encoded = minicbor::to_vec(record)?;
        self.tree
            .compare_and_swap(
                record.order_id.as_bytes(),
                None as Option<&[u8]>,
                Some(encoded),
            )?
            .map_err(|_| CheckoutError::DuplicateOrder(record.order_id.clone()))?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn load(&self, order_id: &str) -> Result<Option<OrderRecord>, CheckoutError> {
        let Some(raw) = self.tree.get(order_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(minicbor::decode(&raw)?))
    }

    /// The exactly-once `Pending` to terminal transition. Concurrent callers
    /// race on a compare-and-swap; the loser re-reads the now-terminal
    /// record and reports it as already settled, so fulfillment side effects
    /// can never run twice for one order.
    pub fn settle(
        &self,
        order_id: &str,
        status: OrderStatus,
        receipt: Option<&str>,
    ) -> Result<SettlementOutcome, CheckoutError> {
        debug_assert!(status.is_terminal());

        loop {
            let Some(current) = self.tree.get(order_id.as_bytes())? else {
                return Err(CheckoutError::PaymentVerificationFailed(format!(
                    "no stored order {order_id}"
                )));
            };
            let mut record: OrderRecord = minicbor::decode(&current)?;

            if record.status.is_terminal() {
                return Ok(SettlementOutcome::AlreadySettled(record));
            }

            record.status = status;
            record.history.push(StatusEntry {
                at: TimeStamp::new(),
                status,
                receipt: receipt.map(str::to_string),
            });

            let next = minicbor::to_vec(&record)?;
            match self
                .tree
                .compare_and_swap(order_id.as_bytes(), Some(&current), Some(next))?
            {
                Ok(()) => {
                    self.tree.flush()?;
                    return Ok(SettlementOutcome::Applied(record));
                }
                // Lost the race; the next read observes the winner.
                Err(_) => continue,
            }
        }
    }
}
