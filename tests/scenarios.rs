//! End-to-end checkout scenarios over in-memory gateways and a scripted
//! payment provider.
mod common;

use ascension_checkout::catalog::TokenMapping;
use ascension_checkout::checkout::CheckoutOutcome;
use ascension_checkout::error::CheckoutError;
use ascension_checkout::money::Money;
use ascension_checkout::order::{OrderLine, OrderStatus, PaymentMethod};
use common::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[tokio::test]
async fn catalog_purchase_prices_settles_and_mints() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;
    h.service.catalog().put_token_mapping(&TokenMapping {
        item_id: 100,
        token_id: "0x64".into(),
        network: "testnet".into(),
    })?;
    h.service.players().record_address("player-1", "0xbuyer")?;

    let user = player();
    let lines = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 2,
    }];

    let manifest = h.service.price_order(&user, &lines, None).await?;
    assert_eq!(manifest.total_cost, "4.00".parse::<Money>()?);
    assert_eq!(manifest.lines.len(), 1);
    assert_eq!(manifest.lines[0].quantity, 2);
    assert_eq!(manifest.discount_multiplier, "1".parse::<Money>()?);

    let outcome = h
        .service
        .initiate_checkout(&user, manifest, PaymentMethod::Card, None)
        .await?;
    let CheckoutOutcome::Card { provider_order_id } = outcome else {
        panic!("expected a card outcome");
    };

    // The provider settles exactly the priced total.
    let report = h.service.confirm_and_fulfill(&provider_order_id).await?;
    assert_eq!(report.status, OrderStatus::Fulfilled);
    assert!(!report.already_settled);
    assert!(report.partial_failures.is_empty());

    assert_eq!(
        *h.chain.mints.lock().unwrap(),
        vec![("0x64".to_string(), "0xbuyer".to_string(), 2)]
    );

    // Stock comes off by the minted amount.
    let offers = h.service.sales(None)?;
    assert_eq!(offers[0].contents[0].available_for_purchase, 3);
    Ok(())
}

#[tokio::test]
async fn underpaid_settlement_fails_without_minting() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;
    h.service.catalog().put_token_mapping(&TokenMapping {
        item_id: 100,
        token_id: "0x64".into(),
        network: "testnet".into(),
    })?;
    h.service.players().record_address("player-1", "0xbuyer")?;

    let user = player();
    let lines = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 2,
    }];
    let outcome = h
        .service
        .checkout(&user, &lines, PaymentMethod::Card, None)
        .await?;
    let CheckoutOutcome::Card { provider_order_id } = outcome else {
        panic!("expected a card outcome");
    };

    // A cent short of the $4.00 total.
    h.provider.settle_amount("3.99");
    let report = h.service.confirm_and_fulfill(&provider_order_id).await?;

    assert_eq!(report.status, OrderStatus::Failed);
    assert!(h.chain.mints.lock().unwrap().is_empty());

    let order_id = provider_order_id.strip_prefix("prov-").unwrap();
    let record = h.service.orders().load(order_id)?.expect("order persisted");
    assert_eq!(record.status, OrderStatus::Failed);
    // Terminal entry keeps the raw receipt for audit.
    assert!(record.history.last().unwrap().receipt.is_some());
    Ok(())
}

#[tokio::test]
async fn ascension_disabled_rejects_before_any_payment() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::with_holdings([(9, 5)]),
        MockChain::default(),
    )?;

    let lines = vec![OrderLine::Ascension {
        items: BTreeMap::from([(9, 1)]),
    }];
    let err = h
        .service
        .checkout(&player(), &lines, PaymentMethod::Card, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::AscensionDisabled));
    assert!(h.provider.created.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn ascension_beyond_owned_inventory_is_rejected() -> anyhow::Result<()> {
    let h = harness(
        test_config(true, false),
        MockGame::with_holdings([(9, 2)]),
        MockChain::default(),
    )?;

    let lines = vec![OrderLine::Ascension {
        items: BTreeMap::from([(9, 3)]),
    }];
    let err = h
        .service
        .checkout(&player(), &lines, PaymentMethod::Card, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::InsufficientInventory { item_id: 9 }
    ));
    assert!(h.provider.created.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn ascension_with_no_positive_entries_is_rejected() -> anyhow::Result<()> {
    let h = harness(
        test_config(true, false),
        MockGame::with_holdings([(9, 2)]),
        MockChain::default(),
    )?;

    let lines = vec![OrderLine::Ascension {
        items: BTreeMap::from([(9, 0)]),
    }];
    let err = h
        .service
        .checkout(&player(), &lines, PaymentMethod::Card, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::EmptyAscensionRequest));
    Ok(())
}

#[tokio::test]
async fn unknown_offers_are_rejected() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;

    let lines = vec![OrderLine::Catalog {
        offer_id: 99,
        amount: 1,
    }];
    let err = h
        .service
        .price_order(&player(), &lines, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::UnknownOffer(99)));
    Ok(())
}

#[tokio::test]
async fn stock_is_checked_per_bundle_entry() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    // Two bundled items with independent stock; the scarce one gates the
    // whole offer.
    h.service
        .catalog()
        .put_offer(&offer(7, "2.00", &[(100, 2, 100), (101, 2, 5)]))?;

    let user = player();
    let within = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 2,
    }];
    assert!(h.service.price_order(&user, &within, None).await.is_ok());

    let beyond = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 3,
    }];
    let err = h.service.price_order(&user, &beyond, None).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::OutOfStock {
            offer_id: 7,
            item_id: 101
        }
    ));
    Ok(())
}

#[tokio::test]
async fn crypto_checkout_returns_an_unsigned_transaction() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;

    let lines = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 2,
    }];
    let outcome = h
        .service
        .checkout(&player(), &lines, PaymentMethod::Crypto, Some("0xbuyer"))
        .await?;
    let CheckoutOutcome::Crypto {
        order_id,
        transaction,
    } = outcome
    else {
        panic!("expected a crypto outcome");
    };

    assert_eq!(transaction.to, "0x00000000000000000000000000000000c0ffee00");
    assert_eq!(transaction.gas_limit, 3_000_000);
    // $4.00 at $2000 per coin is 0.002 coins, in base units.
    assert_eq!(transaction.value, 2_000_000_000_000_000);
    assert!(transaction.data.starts_with("0x0f574ba7"));
    assert!(transaction.data.contains(&order_id.replace('-', "")));

    // The pending order was persisted before the descriptor was returned.
    let record = h.service.orders().load(&order_id)?.expect("order persisted");
    assert_eq!(record.status, OrderStatus::Pending);
    assert_eq!(record.payment_method, PaymentMethod::Crypto);
    Ok(())
}

#[tokio::test]
async fn provider_failure_persists_no_card_order() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;
    h.provider
        .fail_create
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let lines = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 1,
    }];
    let err = h
        .service
        .checkout(&player(), &lines, PaymentMethod::Card, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::PaymentProviderError(_)));
    Ok(())
}

#[tokio::test]
async fn discount_applies_once_and_rounds_at_line_totals() -> anyhow::Result<()> {
    // Ten discount tokens at one point each is a 10% discount.
    let h = harness(
        test_config(false, true),
        MockGame::default(),
        MockChain::with_balance(10),
    )?;
    for id in [1, 2, 3] {
        h.service.catalog().put_offer(&offer(id, "1.005", &[(100 + id, 1, 9)]))?;
    }

    let lines: Vec<OrderLine> = [1, 2, 3]
        .into_iter()
        .map(|offer_id| OrderLine::Catalog {
            offer_id,
            amount: 1,
        })
        .collect();
    let manifest = h
        .service
        .price_order(&player(), &lines, Some("0xbuyer"))
        .await?;

    assert_eq!(manifest.discount_multiplier, "0.9".parse::<Money>()?);
    // Each line exports 1.005 × 0.9 = 0.9045 rounded to 0.90; the total is
    // the sum of the rounded lines, not a rounding of the raw sum (2.7135).
    for line in &manifest.lines {
        assert_eq!(line.line_total, "0.90".parse::<Money>()?);
    }
    assert_eq!(manifest.total_cost, "2.70".parse::<Money>()?);

    let summed = manifest
        .lines
        .iter()
        .fold(Decimal::ZERO, |acc, line| acc + line.line_total.amount());
    assert_eq!(manifest.total_cost.amount(), summed);
    Ok(())
}

#[tokio::test]
async fn degraded_discount_never_blocks_checkout() -> anyhow::Result<()> {
    let h = harness(
        test_config(false, true),
        MockGame::default(),
        MockChain::with_balance(10),
    )?;
    h.chain
        .fail_balance
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.service.catalog().put_offer(&offer(7, "2.00", &[(100, 1, 5)]))?;

    let lines = vec![OrderLine::Catalog {
        offer_id: 7,
        amount: 2,
    }];
    let manifest = h
        .service
        .price_order(&player(), &lines, Some("0xbuyer"))
        .await?;

    // Zero discount, full price.
    assert_eq!(manifest.discount_multiplier, "1".parse::<Money>()?);
    assert_eq!(manifest.total_cost, "4.00".parse::<Money>()?);

    // The discount endpoint itself still reports the failure.
    let err = h.service.discount_for_address("0xbuyer").await.unwrap_err();
    assert!(matches!(err, CheckoutError::DiscountUnavailable(_)));
    Ok(())
}

#[tokio::test]
async fn screening_filters_unmapped_items() -> anyhow::Result<()> {
    let h = harness(
        test_config(true, false),
        MockGame::default(),
        MockChain::default(),
    )?;
    h.service.catalog().put_token_mapping(&TokenMapping {
        item_id: 9,
        token_id: "0x09".into(),
        network: "testnet".into(),
    })?;

    assert_eq!(h.service.screen_items(&[4, 9, 12])?, vec![9]);
    Ok(())
}
