//! Sale offers, their bundled contents, and the item-to-token mapping.
//!
//! The catalog is read-mostly from the core's point of view: offers are
//! administered externally, stock is decremented by fulfillment after an
//! accepted mint.
use crate::error::CheckoutError;
use crate::money::Money;
use std::collections::BTreeSet;

/// Display metadata, opaque to pricing.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct OfferMetadata {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub image: String,
}

/// One bundled item inside an offer. Stock is tracked per entry, so one
/// exhausted entry blocks the whole offer at validation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[n(0)]
    pub item_id: u64,
    #[n(1)]
    pub amount_per_unit: u64,
    #[n(2)]
    pub available_for_purchase: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[n(0)]
    pub offer_id: u64,
    #[n(1)]
    pub price: Money,
    #[n(2)]
    pub metadata: OfferMetadata,
    #[n(3)]
    pub contents: Vec<BundleEntry>,
}

impl Offer {
    fn fully_out_of_stock(&self) -> bool {
        self.contents
            .iter()
            .all(|entry| entry.available_for_purchase == 0)
    }
}

/// Maps a game item to its chain token on one network.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TokenMapping {
    #[n(0)]
    pub item_id: u64,
    #[n(1)]
    pub token_id: String,
    #[n(2)]
    pub network: String,
}

pub struct CatalogStore {
    offers: sled::Tree,
    token_map: sled::Tree,
    hide_out_of_stock: bool,
}

// Offers are keyed big-endian so iteration yields canonical ascending order.
fn offer_key(offer_id: u64) -> [u8; 8] {
    offer_id.to_be_bytes()
}

fn mapping_key(network: &str, item_id: u64) -> String {
    format!("{network}:{item_id}")
}

fn unavailable(e: sled::Error) -> CheckoutError {
    CheckoutError::CatalogUnavailable(e.to_string())
}

impl CatalogStore {
    pub fn new(db: &sled::Db, hide_out_of_stock: bool) -> Result<Self, CheckoutError> {
        Ok(Self {
            offers: db.open_tree("offers").map_err(unavailable)?,
            token_map: db.open_tree("token_map").map_err(unavailable)?,
            hide_out_of_stock,
        })
    }

    pub fn put_offer(&self, offer: &Offer) -> Result<(), CheckoutError> {
        let encoded = minicbor::to_vec(offer)?;
        self.offers
            .insert(offer_key(offer.offer_id), encoded)
            .map_err(unavailable)?;
        Ok(())
    }

    pub fn put_token_mapping(&self, mapping: &TokenMapping) -> Result<(), CheckoutError> {
        let encoded = minicbor::to_vec(mapping)?;
        self.token_map
            .insert(mapping_key(&mapping.network, mapping.item_id), encoded)
            .map_err(unavailable)?;
        Ok(())
    }

    /// Active offers in canonical order. Id filtering is a pure post-filter;
    /// when configured, offers with every entry at zero stock are hidden and
    /// stock checks otherwise happen later, at validation time.
    pub fn list_offers(
        &self,
        filter: Option<&BTreeSet<u64>>,
    ) -> Result<Vec<Offer>, CheckoutError> {
        let mut offers = Vec::new();
        for row in self.offers.iter() {
            let (_, raw) = row.map_err(unavailable)?;
            let offer: Offer = minicbor::decode(&raw)?;

            if self.hide_out_of_stock && offer.fully_out_of_stock() {
                continue;
            }
            if let Some(ids) = filter {
                if !ids.contains(&offer.offer_id) {
                    continue;
                }
            }
            offers.push(offer);
        }
        Ok(offers)
    }

    /// Point lookup used by pricing. Unlike [`Self::list_offers`] this never
    /// hides exhausted offers, so validation can report them as out of stock
    /// rather than unknown.
    pub fn offer(&self, offer_id: u64) -> Result<Option<Offer>, CheckoutError> {
        let Some(raw) = self.offers.get(offer_key(offer_id)).map_err(unavailable)? else {
            return Ok(None);
        };
        Ok(Some(minicbor::decode(&raw)?))
    }

    pub fn token_for_item(
        &self,
        network: &str,
        item_id: u64,
    ) -> Result<Option<TokenMapping>, CheckoutError> {
        let Some(raw) = self
            .token_map
            .get(mapping_key(network, item_id))
            .map_err(unavailable)?
        else {
            return Ok(None);
        };
        Ok(Some(minicbor::decode(&raw)?))
    }

    /// Keep only the candidate items that have a token equivalent on this
    /// network, preserving the caller's order.
    pub fn screen_items(
        &self,
        network: &str,
        candidates: &[u64],
    ) -> Result<Vec<u64>, CheckoutError> {
        let mut screened = Vec::new();
        for &item_id in candidates {
            if self.token_for_item(network, item_id)?.is_some() {
                screened.push(item_id);
            }
        }
        Ok(screened)
    }

    /// Single-row stock decrement for one bundle entry, saturating at zero.
    pub fn decrement_stock(
        &self,
        offer_id: u64,
        item_id: u64,
        amount: u64,
    ) -> Result<(), CheckoutError> {
        let mut codec_error = None;
        self.offers
            .update_and_fetch(offer_key(offer_id), |old| {
                let raw = old?;
                let mut offer: Offer = match minicbor::decode(raw) {
                    Ok(offer) => offer,
                    Err(e) => {
                        codec_error = Some(e.to_string());
                        return Some(raw.to_vec());
                    }
                };
                for entry in &mut offer.contents {
                    if entry.item_id == item_id {
                        entry.available_for_purchase =
                            entry.available_for_purchase.saturating_sub(amount);
                    }
                }
                match minicbor::to_vec(&offer) {
                    Ok(encoded) => Some(encoded),
                    Err(e) => {
                        codec_error = Some(e.to_string());
                        Some(raw.to_vec())
                    }
                }
            })
            .map_err(unavailable)?;

        if let Some(cause) = codec_error {
            return Err(CheckoutError::Codec(cause));
        }
        Ok(())
    }
}
