//! # Inventory Balance Replay
//!
//! A library for reconstructing point-in-time inventory balances from a
//! chronological ledger of stock movements.
//!
//! ## Core Concepts
//!
//! - **Movement**: a dated stock transaction (inbound, outbound, or reset)
//!   affecting one product, fetched from an external ledger API.
//! - **Reset**: a movement whose reference code is the sentinel `"000000"`,
//!   recording an authoritative absolute stock count. It overrides the
//!   accumulated quantity instead of adding to it.
//! - **Replay**: the deterministic, ordered folding of movements into a
//!   balance as of a target date.
//! - **Point-in-time balance**: for today, the externally-maintained
//!   current balance table is the system of record (with replay as a
//!   fallback when it is unpopulated); for any other date, balances are
//!   replayed from a bounded movement window.
//!
//! ## Example
//!
//! ```rust,ignore
//! use inventory_balance_replay::*;
//! use chrono::NaiveDate;
//!
//! // Movements as fetched from the ledger API (order not guaranteed).
//! let raw: Vec<RawMovement> = serde_json::from_str(payload)?;
//!
//! let as_of = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
//! let report = replay_balances(&raw, as_of, None, &ReplayOptions::default());
//!
//! for balance in &report.balances {
//!     println!("{}: {} on hand", balance.product_id, balance.quantity);
//! }
//! println!("total value {:.2}", report.summary.total_value);
//! ```

pub mod engine;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod schema;
pub mod utils;

#[cfg(feature = "api")]
pub mod api;

pub use engine::ReplayEngine;
pub use error::{BalanceReplayError, Result};
pub use ingestion::*;
pub use query::*;
pub use schema::*;
pub use utils::*;

use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeSet;

/// Replays a batch of already-fetched raw movements into the balance of
/// every product as of `as_of`. This is the pure, in-process entry point;
/// the `api` feature's `BalanceService` adds the fetch-and-decide layer on
/// top of it.
///
/// Products with no applicable movement are absent from the result —
/// absence and a zero balance are distinct outcomes.
pub fn replay_balances(
    raw: &[RawMovement],
    as_of: NaiveDate,
    products: Option<&BTreeSet<String>>,
    options: &ReplayOptions,
) -> BalanceReport {
    info!("Replaying {} raw movements as of {}", raw.len(), as_of);

    let normalized = normalize_movements(raw, as_of, products, options);
    debug!(
        "{} products with {} applicable movements ({} rows skipped)",
        normalized.per_product.len(),
        normalized.movement_count(),
        normalized.skipped
    );

    let engine = ReplayEngine::new(options.clone());
    let (balances, replay_diagnostics) = engine.replay_all(&normalized, as_of);

    let mut diagnostics = normalized.diagnostics;
    diagnostics.extend(replay_diagnostics);
    build_report(as_of, balances, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_payload() -> Vec<RawMovement> {
        serde_json::from_str(
            r#"[
                {"produto": "P1", "data": "2025-06-05", "quantidade": 50,
                 "valor_unitario": 2.0, "documento": "000000"},
                {"produto": "P1", "data": "2025-06-01", "quantidade": 10,
                 "valor_unitario": 2.0, "documento": "123"},
                {"produto": "P1", "data": "2025-06-08", "quantidade": 6,
                 "valor_unitario": 2.5, "documento": "456", "tipo": "S"},
                {"produto": "P2", "data": "2025-06-03", "quantidade": "bad"},
                {"produto": "P3", "data": "2025-06-02", "quantidade": 4,
                 "valor_unitario": 1.5, "documento": "789"}
            ]"#,
        )
        .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_end_to_end_replay() {
        let report = replay_balances(&raw_payload(), day(10), None, &ReplayOptions::default());

        // P2's only row was unparseable, so P2 is absent.
        assert_eq!(report.balances.len(), 2);

        let p1 = &report.balances[0];
        assert_eq!(p1.product_id, "P1");
        assert_eq!(p1.quantity, 44.0);
        assert_eq!(p1.unit_value, 2.5);
        assert_eq!(p1.total_value, 110.0);
        assert_eq!(p1.movements_applied, 3);

        let p3 = &report.balances[1];
        assert_eq!(p3.product_id, "P3");
        assert_eq!(p3.quantity, 4.0);

        assert_eq!(report.summary.product_count, 2);
        assert_eq!(report.summary.positive_count, 2);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn test_replay_before_first_movement_yields_absence() {
        let report = replay_balances(
            &raw_payload(),
            NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
            None,
            &ReplayOptions::default(),
        );
        assert!(report.balances.is_empty());
        assert_eq!(report.summary.product_count, 0);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let raw = raw_payload();
        let first = replay_balances(&raw, day(10), None, &ReplayOptions::default());
        let second = replay_balances(&raw, day(10), None, &ReplayOptions::default());

        let a = serde_json::to_string(&first.balances).unwrap();
        let b = serde_json::to_string(&second.balances).unwrap();
        assert_eq!(a, b);
        assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[test]
    fn test_product_filter_restricts_report() {
        let filter: BTreeSet<String> = ["P3".to_string()].into();
        let report =
            replay_balances(&raw_payload(), day(10), Some(&filter), &ReplayOptions::default());
        assert_eq!(report.balances.len(), 1);
        assert_eq!(report.balances[0].product_id, "P3");
    }
}
