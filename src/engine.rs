use crate::ingestion::NormalizedMovements;
use crate::schema::{BalanceOrigin, MovementRecord, ProductBalance, ReplayOptions};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeMap;

/// Running per-product state while folding movements.
struct ReplayState {
    quantity: f64,
    unit_value: Option<f64>,
    applied: usize,
}

impl ReplayState {
    fn new() -> Self {
        Self {
            quantity: 0.0,
            unit_value: None,
            applied: 0,
        }
    }

    fn apply(&mut self, movement: &MovementRecord, options: &ReplayOptions) {
        if movement.is_reset(options) {
            // Authoritative stock count: assigned, not added. Everything
            // before this movement stops mattering.
            self.quantity = movement.quantity;
        } else {
            self.quantity += movement.quantity;
        }
        // Valuation tracks the latest observed unit cost, not a weighted
        // average.
        if let Some(unit_value) = movement.unit_value {
            self.unit_value = Some(unit_value);
        }
        self.applied += 1;
    }

    fn into_balance(self, product_id: &str, as_of: NaiveDate) -> Option<ProductBalance> {
        if self.applied == 0 {
            // Absence, not a zero-valued balance.
            return None;
        }
        let unit_value = self.unit_value.unwrap_or(0.0);
        Some(ProductBalance {
            product_id: product_id.to_string(),
            as_of,
            quantity: self.quantity,
            unit_value,
            total_value: self.quantity * unit_value,
            movements_applied: self.applied,
            origin: BalanceOrigin::Replayed,
        })
    }
}

/// Replays ordered movement sequences into point-in-time balances.
pub struct ReplayEngine {
    options: ReplayOptions,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new(ReplayOptions::default())
    }
}

impl ReplayEngine {
    pub fn new(options: ReplayOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Folds one product's ordered movements into its balance as of
    /// `as_of`. Returns `None` when no movement applies on or before that
    /// date. A negative resulting quantity is surfaced as-is and diagnosed,
    /// never clamped.
    pub fn replay_product(
        &self,
        product_id: &str,
        movements: &[MovementRecord],
        as_of: NaiveDate,
        diagnostics: &mut Vec<String>,
    ) -> Option<ProductBalance> {
        let mut state = ReplayState::new();
        for movement in movements.iter().filter(|m| m.date <= as_of) {
            state.apply(movement, &self.options);
        }

        let balance = state.into_balance(product_id, as_of)?;
        debug!(
            "Replayed {} movements for {}: quantity {} as of {}",
            balance.movements_applied, product_id, balance.quantity, as_of
        );
        if balance.quantity < 0.0 {
            let message = format!(
                "Negative on-hand quantity {} for {} as of {}",
                balance.quantity, product_id, as_of
            );
            warn!("{}", message);
            diagnostics.push(message);
        }
        Some(balance)
    }

    /// Sequential fold over every product in the normalized batch. Products
    /// are independent, so this could run in parallel, but ordering and
    /// output never depend on that.
    pub fn replay_all(
        &self,
        normalized: &NormalizedMovements,
        as_of: NaiveDate,
    ) -> (Vec<ProductBalance>, Vec<String>) {
        let mut balances = Vec::with_capacity(normalized.per_product.len());
        let mut diagnostics = Vec::new();

        for (product_id, movements) in &normalized.per_product {
            if let Some(balance) =
                self.replay_product(product_id, movements, as_of, &mut diagnostics)
            {
                balances.push(balance);
            }
        }

        (balances, diagnostics)
    }

    /// Balance at each requested cutoff date, computed in one ordered pass.
    /// Dates preceding the product's first movement are absent from the
    /// result, matching the absence semantics of a single replay.
    pub fn balance_series(
        &self,
        product_id: &str,
        movements: &[MovementRecord],
        dates: &[NaiveDate],
    ) -> BTreeMap<NaiveDate, ProductBalance> {
        let mut cutoffs: Vec<NaiveDate> = dates.to_vec();
        cutoffs.sort_unstable();
        cutoffs.dedup();

        let mut series = BTreeMap::new();
        let mut state = ReplayState::new();
        let mut next = 0;

        for cutoff in cutoffs {
            while next < movements.len() && movements[next].date <= cutoff {
                state.apply(&movements[next], &self.options);
                next += 1;
            }
            if state.applied > 0 {
                let snapshot = ReplayState {
                    quantity: state.quantity,
                    unit_value: state.unit_value,
                    applied: state.applied,
                };
                if let Some(balance) = snapshot.into_balance(product_id, cutoff) {
                    series.insert(cutoff, balance);
                }
            }
        }

        series
    }
}
