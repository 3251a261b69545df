use crate::schema::{DayOrdering, MovementRecord, RawMovement, ReplayOptions};
use crate::utils::parse_ledger_date;
use chrono::NaiveDate;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// Replay-ready movement sequences, one per product, ordered by
/// `(date, sequence)` and truncated to the as-of date.
#[derive(Debug, Clone, Default)]
pub struct NormalizedMovements {
    pub per_product: BTreeMap<String, Vec<MovementRecord>>,
    pub diagnostics: Vec<String>,
    /// Raw rows excluded for missing or unparseable fields.
    pub skipped: usize,
}

impl NormalizedMovements {
    pub fn movement_count(&self) -> usize {
        self.per_product.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_product.is_empty()
    }
}

fn record_diagnostic(diagnostics: &mut Vec<String>, message: String) {
    warn!("{}", message);
    diagnostics.push(message);
}

/// Transforms an unordered batch of raw ledger rows into per-product replay
/// sequences. Rows with a missing product, an unparseable date or an
/// unparseable quantity are excluded and diagnosed; replay still proceeds
/// over everything parseable.
pub fn normalize_movements(
    raw: &[RawMovement],
    as_of: NaiveDate,
    products: Option<&BTreeSet<String>>,
    options: &ReplayOptions,
) -> NormalizedMovements {
    let mut normalized = NormalizedMovements::default();

    for (index, row) in raw.iter().enumerate() {
        let product_id = match row.product_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                normalized.skipped += 1;
                record_diagnostic(
                    &mut normalized.diagnostics,
                    format!("Skipped movement #{}: missing product id", index),
                );
                continue;
            }
        };

        let date = match row.date.as_deref().and_then(parse_ledger_date) {
            Some(date) => date,
            None => {
                normalized.skipped += 1;
                record_diagnostic(
                    &mut normalized.diagnostics,
                    format!(
                        "Skipped movement #{} for {}: unparseable date {:?}",
                        index, product_id, row.date
                    ),
                );
                continue;
            }
        };

        let quantity = match row.quantity.as_ref().and_then(|q| q.as_f64()) {
            Some(quantity) => quantity,
            None => {
                normalized.skipped += 1;
                record_diagnostic(
                    &mut normalized.diagnostics,
                    format!(
                        "Skipped movement #{} for {} on {}: unparseable quantity",
                        index, product_id, date
                    ),
                );
                continue;
            }
        };

        if date > as_of {
            continue;
        }
        if let Some(filter) = products {
            if !filter.contains(&product_id) {
                continue;
            }
        }

        let unit_value = match row.unit_value.as_ref() {
            Some(value) => {
                let parsed = value.as_f64();
                if parsed.is_none() {
                    record_diagnostic(
                        &mut normalized.diagnostics,
                        format!(
                            "Movement #{} for {} on {}: unparseable unit value, kept without one",
                            index, product_id, date
                        ),
                    );
                }
                parsed
            }
            None => None,
        };

        let reference_code = row
            .reference_code
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_string();

        // The direction flag only disambiguates unsigned payloads; resets
        // carry absolute counts and are never negated.
        let is_reset = reference_code == options.reset_reference_code;
        let quantity = if !is_reset && row.is_outbound() && quantity > 0.0 {
            -quantity
        } else {
            quantity
        };

        normalized
            .per_product
            .entry(product_id.clone())
            .or_default()
            .push(MovementRecord {
                product_id,
                date,
                sequence: row.sequence.unwrap_or(index as u64),
                quantity,
                unit_value,
                reference_code,
            });
    }

    for (product_id, movements) in &mut normalized.per_product {
        sort_for_replay(movements, options);
        dedupe_key_collisions(product_id, movements, options, &mut normalized.diagnostics);
    }

    normalized
}

fn sort_for_replay(movements: &mut [MovementRecord], options: &ReplayOptions) {
    match options.day_ordering {
        DayOrdering::SourceOrder => {
            movements.sort_by_key(|m| (m.date, m.sequence));
        }
        DayOrdering::ResetFirst => {
            movements.sort_by_key(|m| (m.date, !m.is_reset(options), m.sequence));
        }
    }
}

/// No two records may share a `(date, sequence)` key. When the ledger
/// violates that anyway: a reset wins over a non-reset, otherwise the
/// later-arriving row wins.
fn dedupe_key_collisions(
    product_id: &str,
    movements: &mut Vec<MovementRecord>,
    options: &ReplayOptions,
    diagnostics: &mut Vec<String>,
) {
    if movements.len() < 2 {
        return;
    }

    let mut resolved: Vec<MovementRecord> = Vec::with_capacity(movements.len());
    for movement in movements.drain(..) {
        match resolved.last() {
            Some(last) if (last.date, last.sequence) == (movement.date, movement.sequence) => {
                let keep_new = movement.is_reset(options) || !last.is_reset(options);
                record_diagnostic(
                    diagnostics,
                    format!(
                        "Duplicate key ({}, {}) for {}: kept {} movement",
                        movement.date,
                        movement.sequence,
                        product_id,
                        if keep_new { "later" } else { "earlier" }
                    ),
                );
                if keep_new {
                    *resolved.last_mut().unwrap() = movement;
                }
            }
            _ => resolved.push(movement),
        }
    }
    *movements = resolved;
}
