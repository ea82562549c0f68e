//! Order pricing and validation.
//!
//! Pricing is a pure, repeatable read: it consults the catalog, the game
//! inventory, and the discount calculator, short-circuits on the first
//! violation, and has no observable side effects. The manifest it produces
//! is the only thing payment and fulfillment ever trust.
use crate::catalog::CatalogStore;
use crate::config::AscensionConfig;
use crate::discount::DiscountCalculator;
use crate::error::CheckoutError;
use crate::gateway::{GameGateway, UserContext};
use crate::money::{Money, round_currency};
use crate::order::{LineSource, OrderLine, OrderManifest, PricedLine};
use crate::players::{PlayerDirectory, ZERO_ADDRESS};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

pub struct PricingEngine {
    catalog: Arc<CatalogStore>,
    discount: Arc<DiscountCalculator>,
    game: Arc<dyn GameGateway>,
    players: Arc<PlayerDirectory>,
    ascension: AscensionConfig,
}

impl PricingEngine {
    pub fn new(
        catalog: Arc<CatalogStore>,
        discount: Arc<DiscountCalculator>,
        game: Arc<dyn GameGateway>,
        players: Arc<PlayerDirectory>,
        ascension: AscensionConfig,
    ) -> Self {
        Self {
            catalog,
            discount,
            game,
            players,
            ascension,
        }
    }

    /// Validate a requested order and produce its priced manifest.
    pub async fn price_order(
        &self,
        user: &UserContext,
        lines: &[OrderLine],
        purchaser: Option<&str>,
    ) -> Result<OrderManifest, CheckoutError> {
        let (catalog_lines, ascension_items, ascension_requested) = partition_lines(lines);

        if ascension_requested && !self.ascension.enabled {
            return Err(CheckoutError::AscensionDisabled);
        }

        if ascension_requested {
            if ascension_items.is_empty() {
                return Err(CheckoutError::EmptyAscensionRequest);
            }
            self.check_game_inventory(user, &ascension_items).await?;
        }

        let offers = self.fetch_offers(&catalog_lines)?;
        for &(offer_id, amount) in &catalog_lines {
            let offer = &offers[&offer_id];
            for entry in &offer.contents {
                let requested = entry.amount_per_unit.saturating_mul(amount);
                if requested > entry.available_for_purchase {
                    return Err(CheckoutError::OutOfStock {
                        offer_id,
                        item_id: entry.item_id,
                    });
                }
            }
        }

        let multiplier = self.resolve_multiplier(user, purchaser).await?;

        let mut priced = Vec::with_capacity(catalog_lines.len() + 1);
        for (offer_id, amount) in catalog_lines {
            let offer = &offers[&offer_id];
            let unit_price = offer.price.amount() * multiplier;
            priced.push(PricedLine {
                source: LineSource::Catalog { offer_id },
                name: offer.metadata.name.clone(),
                description: offer.metadata.description.clone(),
                unit_price: Money(unit_price),
                quantity: amount,
                line_total: Money(round_currency(unit_price * Decimal::from(amount))),
                contents: offer.contents.clone(),
            });
        }
        if !ascension_items.is_empty() {
            let count = ascension_items.len() as u64;
            let unit_price = self.ascension.cost.amount() * multiplier;
            priced.push(PricedLine {
                source: LineSource::Ascension,
                name: format!("{count} x Ascension"),
                description: self.ascension.description.clone(),
                unit_price: Money(unit_price),
                quantity: count,
                line_total: Money(round_currency(unit_price * Decimal::from(count))),
                contents: Vec::new(),
            });
        }

        let total = priced
            .iter()
            .fold(Decimal::ZERO, |acc, line| acc + line.line_total.amount());

        Ok(OrderManifest {
            lines: priced,
            discount_multiplier: Money(multiplier),
            total_cost: Money(total),
            ascension_items,
        })
    }

    async fn check_game_inventory(
        &self,
        user: &UserContext,
        requested: &BTreeMap<u64, u64>,
    ) -> Result<(), CheckoutError> {
        let inventory = self
            .game
            .inventory(&user.game_token)
            .await
            .map_err(|e| CheckoutError::InventoryUnavailable(e.to_string()))?;

        let owned: BTreeMap<u64, u64> = inventory
            .into_iter()
            .filter(|holding| holding.amount > 0)
            .map(|holding| (holding.item_id, holding.amount))
            .collect();

        for (&item_id, &amount) in requested {
            if owned.get(&item_id).copied().unwrap_or(0) < amount {
                return Err(CheckoutError::InsufficientInventory { item_id });
            }
        }
        Ok(())
    }

    /// Fetch only the referenced offers. The filtered lookup is an
    /// optimization; correctness comes from the per-entry stock checks.
    fn fetch_offers(
        &self,
        catalog_lines: &[(u64, u64)],
    ) -> Result<BTreeMap<u64, crate::catalog::Offer>, CheckoutError> {
        let ids: BTreeSet<u64> = catalog_lines.iter().map(|&(id, _)| id).collect();
        let mut offers = BTreeMap::new();
        for id in ids {
            match self.catalog.offer(id)? {
                Some(offer) => {
                    offers.insert(id, offer);
                }
                None => return Err(CheckoutError::UnknownOffer(id)),
            }
        }
        Ok(offers)
    }

    /// Resolve the discount once per checkout, from the provided address or
    /// the player's last-known one. A degraded discount never blocks a
    /// purchase: lookup failure prices the order at full rate.
    async fn resolve_multiplier(
        &self,
        user: &UserContext,
        purchaser: Option<&str>,
    ) -> Result<Decimal, CheckoutError> {
        let address = match purchaser {
            Some(addr) if !addr.is_empty() && addr != ZERO_ADDRESS => Some(addr.to_string()),
            _ => self.players.last_address(&user.user_id)?,
        };

        let percent = match address {
            Some(addr) => match self.discount.discount_for(&addr).await {
                Ok(percent) => percent,
                Err(CheckoutError::DiscountUnavailable(cause)) => {
                    warn!(user_id = %user.user_id, %cause, "discount degraded to zero");
                    Decimal::ZERO
                }
                Err(other) => return Err(other),
            },
            None => Decimal::ZERO,
        };

        Ok((Decimal::ONE_HUNDRED - percent) / Decimal::ONE_HUNDRED)
    }
}

/// Split requested lines into catalog lines and the ascension map. Ascension
/// entries are folded together (amounts summed) and non-positive entries
/// dropped, so only qualifying entries survive.
fn partition_lines(lines: &[OrderLine]) -> (Vec<(u64, u64)>, BTreeMap<u64, u64>, bool) {
    let mut catalog_lines = Vec::new();
    let mut ascension_items = BTreeMap::new();
    let mut ascension_requested = false;

    for line in lines {
        match line {
            OrderLine::Catalog { offer_id, amount } => catalog_lines.push((*offer_id, *amount)),
            OrderLine::Ascension { items } => {
                ascension_requested = true;
                for (&item_id, &amount) in items {
                    if amount > 0 {
                        *ascension_items.entry(item_id).or_insert(0) += amount;
                    }
                }
            }
        }
    }

    (catalog_lines, ascension_items, ascension_requested)
}
