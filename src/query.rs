use crate::error::Result;
use crate::schema::{BalanceReport, BalanceSummary, ProductBalance, QueryConfig};
use crate::utils::lookback_start;
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeMap;

/// Which data source answers a point-in-time query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPlan {
    /// The externally-maintained current balance table is the system of
    /// record for today.
    CurrentTable,
    /// Any other date is answered by replaying movements fetched from a
    /// bounded window ending at the target date.
    HistoricalReplay { window_start: NaiveDate },
}

pub fn plan_query(as_of: NaiveDate, today: NaiveDate, config: &QueryConfig) -> Result<QueryPlan> {
    config.validate()?;

    let plan = if as_of == today {
        QueryPlan::CurrentTable
    } else {
        QueryPlan::HistoricalReplay {
            window_start: lookback_start(as_of, config.lookback_months),
        }
    };
    debug!("Planned {:?} for as-of {} (today {})", plan, as_of, today);
    Ok(plan)
}

/// Merges authoritative current-table rows with replayed balances. The
/// table wins per product; replayed balances only fill the gaps the table
/// left (it is sometimes empty or partially populated while movements
/// exist), and every such fallback is diagnosed.
pub fn merge_current_and_replayed(
    current: Vec<ProductBalance>,
    replayed: Vec<ProductBalance>,
) -> (Vec<ProductBalance>, Vec<String>) {
    let mut merged: BTreeMap<String, ProductBalance> = current
        .into_iter()
        .map(|balance| (balance.product_id.clone(), balance))
        .collect();
    let mut diagnostics = Vec::new();

    for balance in replayed {
        if merged.contains_key(&balance.product_id) {
            continue;
        }
        diagnostics.push(format!(
            "Current balance table has no row for {}; replayed {} movements instead",
            balance.product_id, balance.movements_applied
        ));
        merged.insert(balance.product_id.clone(), balance);
    }

    (merged.into_values().collect(), diagnostics)
}

pub fn summarize(balances: &[ProductBalance]) -> BalanceSummary {
    let mut summary = BalanceSummary {
        product_count: balances.len(),
        ..BalanceSummary::default()
    };
    for balance in balances {
        if balance.quantity > 0.0 {
            summary.positive_count += 1;
        } else {
            summary.non_positive_count += 1;
        }
        summary.total_value += balance.total_value;
    }
    summary
}

/// Final result shape: balances ordered by product id, aggregate summary
/// attached.
pub fn build_report(
    as_of: NaiveDate,
    mut balances: Vec<ProductBalance>,
    diagnostics: Vec<String>,
) -> BalanceReport {
    balances.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    let summary = summarize(&balances);
    info!(
        "Balance report as of {}: {} products, total value {:.2}, {} diagnostics",
        as_of,
        summary.product_count,
        summary.total_value,
        diagnostics.len()
    );
    BalanceReport {
        as_of,
        balances,
        summary,
        diagnostics,
    }
}
