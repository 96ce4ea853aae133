//! Position and balance tables.
//!
//! Both tables are immutable snapshots behind an `Arc`. A reconcile builds
//! the next map and swaps it in; readers clone the `Arc` and never observe a
//! half-applied poll.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::types::{Balance, Position, PositionKey, PositionSide};
use crate::Decimal;
use crate::config::{AbsentPositionPolicy, PositionMode};
use crate::wire::{WireBalances, WirePosition};

/// Positions keyed per [`PositionKey`].
pub type PositionTable = HashMap<PositionKey, Position>;

/// Balances keyed by asset.
pub type BalanceTable = HashMap<String, Balance>;

/// Summary of a positions reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionsReport {
    /// Non-zero positions written.
    pub updated: usize,
    /// Previous entries with no successor, either flattened in the payload
    /// or absent under [`AbsentPositionPolicy::Flatten`].
    pub removed: usize,
    /// Payload entries whose market could not be mapped.
    pub skipped: usize,
}

/// Copy-on-write position and balance tables.
#[derive(Debug, Default)]
pub struct AccountBook {
    positions: RwLock<Arc<PositionTable>>,
    balances: RwLock<Arc<BalanceTable>>,
}

impl AccountBook {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current positions snapshot.
    #[must_use]
    pub fn positions(&self) -> Arc<PositionTable> {
        Arc::clone(&self.positions.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current balances snapshot.
    #[must_use]
    pub fn balances(&self) -> Arc<BalanceTable> {
        Arc::clone(&self.balances.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Available balance of an asset, zero if unknown.
    #[must_use]
    pub fn available_balance(&self, asset: &str) -> Decimal {
        self.balances()
            .get(asset)
            .map(|balance| balance.available)
            .unwrap_or_default()
    }

    /// Total balance of an asset, zero if unknown.
    #[must_use]
    pub fn total_balance(&self, asset: &str) -> Decimal {
        self.balances()
            .get(asset)
            .map(|balance| balance.total)
            .unwrap_or_default()
    }

    /// Replaces positions for every trading pair present in `entries`.
    ///
    /// Existing entries of a present pair are dropped and the payload's
    /// non-zero positions inserted. Pairs absent from the payload follow
    /// `policy`. `resolve` maps exchange symbols to trading pairs.
    pub fn reconcile_positions<F>(
        &self,
        entries: Vec<WirePosition>,
        mode: PositionMode,
        policy: AbsentPositionPolicy,
        resolve: F,
    ) -> PositionsReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = PositionsReport::default();
        let mut incoming: Vec<Position> = Vec::new();
        let mut present: HashSet<String> = HashSet::new();

        for entry in entries {
            let symbol = entry.market.clone().unwrap_or_default();
            let Some(trading_pair) = resolve(&symbol) else {
                debug!(symbol = %symbol, "skipping position for unmapped market");
                report.skipped += 1;
                continue;
            };
            present.insert(trading_pair.clone());

            let size = entry.net_size.unwrap_or_default();
            if size.is_zero() {
                continue;
            }
            let side = entry
                .side
                .as_deref()
                .and_then(PositionSide::from_exchange)
                .unwrap_or(if size.is_sign_negative() {
                    PositionSide::Short
                } else {
                    PositionSide::Long
                });

            incoming.push(Position {
                trading_pair,
                side,
                amount: size.abs(),
                entry_price: entry.entry_price.unwrap_or_default(),
                unrealized_pnl: entry.unrealized_pnl.unwrap_or_default(),
                leverage: entry.leverage.filter(|l| !l.is_zero()).unwrap_or(Decimal::ONE),
            });
        }

        let mut guard = self.positions.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: PositionTable = guard
            .iter()
            .filter(|((pair, _), _)| match policy {
                AbsentPositionPolicy::Retain => !present.contains(pair),
                AbsentPositionPolicy::Flatten => false,
            })
            .map(|(key, position)| (key.clone(), position.clone()))
            .collect();

        for position in incoming {
            let key = position_key(&position, mode);
            if next.insert(key, position).is_some() {
                warn!("position payload carried duplicate entries for one key");
            } else {
                report.updated += 1;
            }
        }

        report.removed = guard.keys().filter(|key| !next.contains_key(*key)).count();
        *guard = Arc::new(next);
        report
    }

    /// Fully replaces balances from any accepted payload shape.
    ///
    /// Returns the number of assets written.
    pub fn reconcile_balances(&self, payload: WireBalances) -> usize {
        let mut next = BalanceTable::new();

        let (collateral, entries) = match payload {
            WireBalances::List(entries) => (HashMap::new(), entries),
            WireBalances::Sections(sections) => (sections.collateral, sections.balances),
        };

        for (asset, info) in collateral {
            let total = info.value.unwrap_or_default();
            let available = info.free_collateral.unwrap_or(total);
            next.insert(asset, Balance { total, available });
        }
        for entry in entries {
            let Some(asset) = entry.currency else {
                debug!("skipping balance entry without asset");
                continue;
            };
            let total = entry.total.unwrap_or_default();
            let available = entry.free.unwrap_or(total);
            next.insert(asset, Balance { total, available });
        }

        let count = next.len();
        *self.balances.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        count
    }
}

/// Table key for a position under the given mode.
#[must_use]
pub fn position_key(position: &Position, mode: PositionMode) -> PositionKey {
    match mode {
        PositionMode::OneWay => (position.trading_pair.clone(), None),
        PositionMode::Hedge => (position.trading_pair.clone(), Some(position.side)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::wire;
    use serde_json::{Value, json};

    fn resolve(symbol: &str) -> Option<String> {
        match symbol {
            "BTC-PERP" => Some("BTC-USD".to_string()),
            "ETH-PERP" => Some("ETH-USD".to_string()),
            _ => None,
        }
    }

    fn positions(raw: Value) -> Vec<WirePosition> {
        wire::decode_list(&raw).unwrap()
    }

    fn balances(raw: Value) -> WireBalances {
        wire::decode(&raw).unwrap()
    }

    #[test]
    fn test_reconcile_positions_one_way() {
        let book = AccountBook::new();
        let report = book.reconcile_positions(
            positions(json!({"data": [
                {"market": "BTC-PERP", "netSize": "-0.5", "entryPrice": "50000", "leverage": "5"},
                {"market": "ETH-PERP", "size": "2"},
                {"market": "DOGE-PERP", "size": "100"}
            ]})),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );

        assert_eq!(report.updated, 2);
        assert_eq!(report.skipped, 1);
        let table = book.positions();
        let btc = &table[&("BTC-USD".to_string(), None)];
        assert_eq!(btc.side, PositionSide::Short);
        assert_eq!(btc.amount, dec!(0.5));
        assert_eq!(btc.signed_amount(), dec!(-0.5));
        assert_eq!(btc.leverage, dec!(5));
        assert_eq!(table[&("ETH-USD".to_string(), None)].leverage, dec!(1));
    }

    #[test]
    fn test_zero_size_removes_present_pair() {
        let book = AccountBook::new();
        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "1"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        let report = book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "0"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        assert_eq!(report.removed, 1);
        assert!(book.positions().is_empty());
    }

    #[test]
    fn test_replaced_positions_are_not_counted_as_removed() {
        let book = AccountBook::new();
        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "1"}, {"market": "ETH-PERP", "size": "1"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );

        let report = book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "2"}, {"market": "ETH-PERP", "size": "0"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);

        let report = book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "3"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Flatten,
            resolve,
        );
        assert_eq!(report.removed, 0);
        assert_eq!(book.positions()[&("BTC-USD".to_string(), None)].amount, dec!(3));
    }

    #[test]
    fn test_absent_pairs_follow_policy() {
        let book = AccountBook::new();
        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "1"}, {"market": "ETH-PERP", "size": "1"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );

        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "3"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        let table = book.positions();
        assert_eq!(table.len(), 2);
        assert_eq!(table[&("BTC-USD".to_string(), None)].amount, dec!(3));

        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "3"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Flatten,
            resolve,
        );
        assert_eq!(book.positions().len(), 1);
    }

    #[test]
    fn test_hedge_mode_keys_by_side() {
        let book = AccountBook::new();
        book.reconcile_positions(
            positions(json!([
                {"market": "BTC-PERP", "size": "1", "side": "long"},
                {"market": "BTC-PERP", "size": "2", "side": "short"}
            ])),
            PositionMode::Hedge,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        let table = book.positions();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&("BTC-USD".to_string(), Some(PositionSide::Short))].amount,
            dec!(2)
        );
    }

    #[test]
    fn test_snapshot_is_immutable_for_readers() {
        let book = AccountBook::new();
        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "1"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        let before = book.positions();
        book.reconcile_positions(
            positions(json!([{"market": "BTC-PERP", "size": "0"}])),
            PositionMode::OneWay,
            AbsentPositionPolicy::Retain,
            resolve,
        );
        assert_eq!(before.len(), 1);
        assert!(book.positions().is_empty());
    }

    #[test]
    fn test_balance_shapes_are_equivalent() {
        let collateral = AccountBook::new();
        collateral.reconcile_balances(balances(json!({
            "data": {"collateral": {"USD": {"value": "1000", "freeCollateral": "800"}}}
        })));

        let flat = AccountBook::new();
        flat.reconcile_balances(balances(json!({
            "balances": [{"currency": "USD", "total": "1000", "free": "800"}]
        })));

        let bare = AccountBook::new();
        bare.reconcile_balances(balances(json!([
            {"asset": "USD", "balance": "1000", "availableBalance": "800"}
        ])));

        assert_eq!(collateral.balances(), flat.balances());
        assert_eq!(flat.balances(), bare.balances());
        assert_eq!(collateral.available_balance("USD"), dec!(800));
        assert_eq!(collateral.total_balance("USD"), dec!(1000));
    }

    #[test]
    fn test_balances_combined_and_fully_replaced() {
        let book = AccountBook::new();
        let count = book.reconcile_balances(balances(json!({
            "collateral": {"USD": {"value": "10"}},
            "balances": [{"currency": "BTC", "total": "1"}]
        })));
        assert_eq!(count, 2);
        assert_eq!(book.available_balance("USD"), dec!(10));
        assert_eq!(book.available_balance("BTC"), dec!(1));

        book.reconcile_balances(balances(json!({"balances": [{"currency": "ETH", "total": "3"}]})));
        assert_eq!(book.balances().len(), 1);
        assert_eq!(book.available_balance("USD"), Decimal::ZERO);
    }
}
