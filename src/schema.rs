use crate::error::{BalanceReplayError, Result};
use crate::utils::parse_loose_number;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Reference code that marks a movement as an absolute stock count rather
/// than a delta.
pub const RESET_REFERENCE_CODE: &str = "000000";

/// Numeric field as delivered by the ledger API: sometimes a JSON number,
/// sometimes a string (occasionally with a decimal comma).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LooseNumber::Number(n) if n.is_finite() => Some(*n),
            LooseNumber::Number(_) => None,
            LooseNumber::Text(s) => parse_loose_number(s),
        }
    }
}

/// A stock movement row exactly as the ledger API serves it. Field names
/// vary between endpoint versions, so every alias is reconciled here and
/// nowhere else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMovement {
    #[serde(default, alias = "produto", alias = "produto_id", alias = "productId")]
    pub product_id: Option<String>,

    #[serde(default, alias = "data", alias = "data_movimento")]
    pub date: Option<String>,

    /// Intra-day ordering hint. Absent in older payloads, in which case the
    /// arrival index within the fetched batch is used instead.
    #[serde(default, alias = "seq", alias = "ordem")]
    pub sequence: Option<u64>,

    #[serde(default, alias = "quantidade")]
    pub quantity: Option<LooseNumber>,

    #[serde(default, alias = "valor_unitario", alias = "unitValue")]
    pub unit_value: Option<LooseNumber>,

    #[serde(default, alias = "documento", alias = "documento_referencia")]
    pub reference_code: Option<String>,

    /// Direction flag ("E"/"S" style). Only consulted when the quantity
    /// arrives unsigned.
    #[serde(default, alias = "tipo", alias = "operacao")]
    pub direction: Option<String>,
}

impl RawMovement {
    pub fn is_outbound(&self) -> bool {
        match self.direction.as_deref() {
            Some(d) => matches!(
                d.trim().to_ascii_uppercase().as_str(),
                "S" | "SAIDA" | "OUT" | "OUTBOUND"
            ),
            None => false,
        }
    }
}

/// A validated, immutable stock movement. Per product, records are totally
/// ordered by `(date, sequence)`; the normalizer resolves any duplicate
/// keys before these reach the replay engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub product_id: String,
    pub date: NaiveDate,
    pub sequence: u64,
    /// Signed delta for regular movements; absolute counted quantity for
    /// resets.
    pub quantity: f64,
    /// Unit cost carried by this movement, when the ledger provided one.
    pub unit_value: Option<f64>,
    pub reference_code: String,
}

impl MovementRecord {
    pub fn is_reset(&self, options: &ReplayOptions) -> bool {
        self.reference_code == options.reset_reference_code
    }
}

/// Where a balance row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceOrigin {
    /// Served by the externally-maintained current balance table.
    CurrentTable,
    /// Reconstructed by replaying ledger movements.
    Replayed,
}

/// The on-hand quantity and value of one product as of a calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductBalance {
    pub product_id: String,
    pub as_of: NaiveDate,
    pub quantity: f64,
    pub unit_value: f64,
    pub total_value: f64,
    /// Movements folded into this balance. Zero for current-table rows.
    pub movements_applied: usize,
    pub origin: BalanceOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub product_count: usize,
    pub positive_count: usize,
    /// Products with zero or negative on-hand quantity.
    pub non_positive_count: usize,
    pub total_value: f64,
}

/// Uniform result shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReport {
    pub as_of: NaiveDate,
    pub balances: Vec<ProductBalance>,
    pub summary: BalanceSummary,
    pub diagnostics: Vec<String>,
}

/// Ordering applied to movements sharing the same date when the ledger
/// provides no finer timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayOrdering {
    /// Replay same-day movements exactly as the ledger delivered them.
    SourceOrder,
    /// Apply stock-count resets before deltas within the same day.
    ResetFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOptions {
    pub reset_reference_code: String,
    pub day_ordering: DayOrdering,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            reset_reference_code: RESET_REFERENCE_CODE.to_string(),
            day_ordering: DayOrdering::SourceOrder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// How many months of movements to fetch when replaying a historical
    /// date. Bounds the lookback instead of pulling full history.
    pub lookback_months: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { lookback_months: 6 }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookback_months == 0 {
            return Err(BalanceReplayError::InvalidLookback(self.lookback_months));
        }
        Ok(())
    }
}
