//! Per-client cart of photos.
//!
//! The cart lives in the client's tower-sessions [`Session`] under
//! [`CART_KEY`]. All money is [`Decimal`] with two decimal places; nothing
//! here touches floating point.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use sea_orm::prelude::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::error::Result;

/// Session key under which the cart is stored.
pub const CART_KEY: &str = "cart";

/// Stable numeric photo identifier. Carts never hold path tokens.
pub type PhotoId = i32;

/// Formats an amount with exactly two decimal places.
pub fn format_money(amount: Decimal) -> String {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    amount.to_string()
}

/// Amount in minor currency units (cents), if it fits in an `i64`.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    i64::try_from(amount.mantissa()).ok()
}

/// Which unit price an existing entry keeps when the item is added again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PricePolicy {
    /// The price captured on the first add is kept.
    #[default]
    FirstAdd,
    /// Every add overwrites the price with the current one.
    LatestAdd,
}

impl FromStr for PricePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "first-add" => Ok(PricePolicy::FirstAdd),
            "latest-add" => Ok(PricePolicy::LatestAdd),
            other => Err(format!("unknown price policy {other:?}")),
        }
    }
}

impl fmt::Display for PricePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PricePolicy::FirstAdd => "first-add",
            PricePolicy::LatestAdd => "latest-add",
        })
    }
}

/// Quantity and price snapshot for one photo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub qty: u32,
    #[serde(with = "decimal_string")]
    pub unit_price: Decimal,
}

impl CartEntry {
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.qty) * self.unit_price
    }
}

/// One priced line of a [`CartSummary`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryLine {
    pub id: PhotoId,
    pub qty: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CartSummary {
    pub lines: Vec<SummaryLine>,
    pub total: Decimal,
    /// Sum of quantities over every entry, resolvable or not.
    pub count: u64,
}

/// The cart mapping of one client session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    entries: BTreeMap<PhotoId, CartEntry>,
}

impl Cart {
    /// Reads the cart from the session; a missing cart is empty.
    pub async fn load(session: &Session) -> Result<Self> {
        Ok(session.get(CART_KEY).await?.unwrap_or_default())
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        session.insert(CART_KEY, self).await?;
        Ok(())
    }

    /// Adds `qty` of a photo, creating the entry at `unit_price` if absent.
    pub fn add(&mut self, id: PhotoId, unit_price: Decimal, qty: u32, policy: PricePolicy) {
        let entry = self.entries.entry(id).or_insert(CartEntry { qty: 0, unit_price });
        entry.qty = entry.qty.saturating_add(qty);
        if policy == PricePolicy::LatestAdd {
            entry.unit_price = unit_price;
        }
    }

    /// Decrements the quantity, floored at zero. The entry stays in place.
    pub fn remove(&mut self, id: PhotoId, qty: u32) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.qty = entry.qty.saturating_sub(qty);
        }
    }

    /// Removes the entry regardless of quantity. Returns whether it existed.
    pub fn delete(&mut self, id: PhotoId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: PhotoId) -> Option<&CartEntry> {
        self.entries.get(&id)
    }

    /// Sum of quantities across all entries.
    pub fn count(&self) -> u64 {
        self.entries.values().map(|e| u64::from(e.qty)).sum()
    }

    /// Whether no entry has a positive quantity.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Photo ids with a positive quantity, ascending.
    pub fn ids(&self) -> Vec<PhotoId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.qty > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (PhotoId, &CartEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Priced lines for entries whose photo still exists.
    ///
    /// Entries with zero quantity or whose photo `exists` rejects are left
    /// out of both `lines` and `total`.
    pub fn summary(&self, exists: impl Fn(PhotoId) -> bool) -> CartSummary {
        let lines: Vec<SummaryLine> = self
            .entries
            .iter()
            .filter(|(id, e)| e.qty > 0 && exists(**id))
            .map(|(id, e)| SummaryLine {
                id: *id,
                qty: e.qty,
                unit_price: e.unit_price,
                line_total: e.line_total(),
            })
            .collect();
        let total = lines.iter().map(|l| l.line_total).sum();

        CartSummary {
            lines,
            total,
            count: self.count(),
        }
    }
}

mod decimal_string {
    use std::str::FromStr;

    use sea_orm::prelude::Decimal;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let s = String::deserialize(deserializer)?;
        Decimal::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn add_then_remove_restores_count() {
        let mut cart = Cart::default();
        cart.add(1, dec("3.00"), 2, PricePolicy::FirstAdd);
        let before = cart.count();

        cart.add(7, dec("10.00"), 1, PricePolicy::FirstAdd);
        cart.remove(7, 1);

        assert_eq!(cart.count(), before);
        assert_eq!(cart.get(7).map(|e| e.qty), Some(0));
    }

    #[test]
    fn remove_floors_at_zero() {
        let mut cart = Cart::default();
        cart.add(1, dec("1.00"), 1, PricePolicy::FirstAdd);
        cart.remove(1, 5);
        cart.remove(1, 1);
        cart.remove(99, 1);
        assert_eq!(cart.get(1).unwrap().qty, 0);
        assert!(cart.get(99).is_none());
        assert!(cart.is_empty());
    }

    #[test]
    fn delete_drops_entry() {
        let mut cart = Cart::default();
        cart.add(1, dec("1.00"), 4, PricePolicy::FirstAdd);
        assert!(cart.delete(1));
        assert!(!cart.delete(1));
        assert_eq!(cart.count(), 0);
        assert!(cart.get(1).is_none());
    }

    #[test]
    fn first_add_price_wins_by_default() {
        let mut cart = Cart::default();
        cart.add(1, dec("10.00"), 1, PricePolicy::FirstAdd);
        cart.add(1, dec("12.00"), 1, PricePolicy::FirstAdd);
        assert_eq!(cart.get(1).unwrap().unit_price, dec("10.00"));
        assert_eq!(cart.get(1).unwrap().qty, 2);
    }

    #[test]
    fn latest_add_overwrites_price() {
        let mut cart = Cart::default();
        cart.add(1, dec("10.00"), 1, PricePolicy::LatestAdd);
        cart.add(1, dec("12.00"), 1, PricePolicy::LatestAdd);
        assert_eq!(cart.get(1).unwrap().unit_price, dec("12.00"));
    }

    #[test]
    fn count_tracks_any_operation_sequence() {
        let mut cart = Cart::default();
        let ops: &[(u8, PhotoId, u32)] = &[
            (0, 1, 3),
            (0, 2, 1),
            (1, 1, 1),
            (2, 2, 0),
            (0, 3, 5),
            (1, 3, 9),
            (0, 1, 2),
            (1, 4, 1),
        ];
        for &(op, id, qty) in ops {
            match op {
                0 => cart.add(id, dec("1.50"), qty, PricePolicy::FirstAdd),
                1 => cart.remove(id, qty),
                _ => {
                    cart.delete(id);
                }
            }
            let expected: u64 = cart.entries().map(|(_, e)| u64::from(e.qty)).sum();
            assert_eq!(cart.count(), expected);
        }
        assert_eq!(cart.count(), 4);
    }

    #[test]
    fn summary_totals_exactly() {
        let mut cart = Cart::default();
        cart.add(1, dec("10.00"), 2, PricePolicy::FirstAdd);
        cart.add(2, dec("5.50"), 1, PricePolicy::FirstAdd);

        let summary = cart.summary(|_| true);
        assert_eq!(format_money(summary.total), "25.50");
        assert_eq!(summary.count, 3);
        assert_eq!(cart.count(), 3);
        assert_eq!(summary.lines.len(), 2);
        assert_eq!(format_money(summary.lines[0].line_total), "20.00");
    }

    #[test]
    fn summary_skips_deleted_items() {
        let mut cart = Cart::default();
        cart.add(1, dec("10.00"), 2, PricePolicy::FirstAdd);
        cart.add(2, dec("5.50"), 1, PricePolicy::FirstAdd);

        let summary = cart.summary(|id| id != 1);
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.lines[0].id, 2);
        assert_eq!(format_money(summary.total), "5.50");
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn no_float_drift_over_many_lines() {
        let mut cart = Cart::default();
        for id in 0..1000 {
            cart.add(id, dec("0.10"), 1, PricePolicy::FirstAdd);
        }
        assert_eq!(format_money(cart.summary(|_| true).total), "100.00");
    }

    #[test]
    fn money_helpers() {
        assert_eq!(format_money(dec("5.5")), "5.50");
        assert_eq!(format_money(Decimal::ZERO), "0.00");
        assert_eq!(minor_units(dec("12.34")), Some(1234));
        assert_eq!(minor_units(dec("7")), Some(700));
    }

    #[test]
    fn price_policy_parses() {
        assert_eq!("first-add".parse::<PricePolicy>().unwrap(), PricePolicy::FirstAdd);
        assert_eq!("latest-add".parse::<PricePolicy>().unwrap(), PricePolicy::LatestAdd);
        assert!("cheapest".parse::<PricePolicy>().is_err());
    }

    #[test]
    fn serde_keeps_prices_exact() {
        let mut cart = Cart::default();
        cart.add(3, dec("19.99"), 2, PricePolicy::FirstAdd);
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["entries"]["3"]["unit_price"], "19.99");
        let back: Cart = serde_json::from_value(json).unwrap();
        assert_eq!(back, cart);
    }
}
