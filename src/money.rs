//! Currency amounts and the rounding rule applied at export time.
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

/// A currency amount in the store's fiat currency.
///
/// Prices keep full precision while a manifest is being computed; the
/// two-decimal rounding happens once, on exported line totals, so that a
/// displayed total always equals the sum of its displayed lines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Round to two decimal places, midpoint away from zero.
    pub fn rounded(&self) -> Money {
        Money(round_currency(self.0))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

/// Two-decimal currency rounding. Applied to exported totals only, never to
/// intermediate unit prices, so rounding error cannot compound across lines.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Decimal has no minicbor impls, so persisted amounts go through the decimal
// string form, which is lossless.
impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0.to_string())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let s = d.str()?;

        Decimal::from_str(s)
            .map(Money)
            .map_err(|_| minicbor::decode::Error::message("failed to parse stored decimal amount"))
    }
}
