use crate::schema::{BalanceOrigin, LooseNumber, ProductBalance};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};

/// A row of the externally-maintained current balance table, as served by
/// the API. Loosely typed for the same reasons as `RawMovement`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBalanceRow {
    #[serde(default, alias = "produto", alias = "produto_id", alias = "productId")]
    pub product_id: Option<String>,

    #[serde(default, alias = "quantidade", alias = "saldo", alias = "saldo_atual")]
    pub quantity: Option<LooseNumber>,

    #[serde(default, alias = "valor_unitario", alias = "custo_unitario")]
    pub unit_value: Option<LooseNumber>,
}

impl RawBalanceRow {
    /// Converts a table row into the uniform balance shape. Rows missing a
    /// product id or a parseable quantity are dropped with a diagnostic;
    /// the table is authoritative but not always clean.
    pub fn into_balance(
        self,
        as_of: NaiveDate,
        index: usize,
        diagnostics: &mut Vec<String>,
    ) -> Option<ProductBalance> {
        let product_id = match self.product_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let message =
                    format!("Skipped current balance row #{}: missing product id", index);
                warn!("{}", message);
                diagnostics.push(message);
                return None;
            }
        };

        let quantity = match self.quantity.as_ref().and_then(LooseNumber::as_f64) {
            Some(quantity) => quantity,
            None => {
                let message = format!(
                    "Skipped current balance row #{} for {}: unparseable quantity",
                    index, product_id
                );
                warn!("{}", message);
                diagnostics.push(message);
                return None;
            }
        };

        let unit_value = self
            .unit_value
            .as_ref()
            .and_then(LooseNumber::as_f64)
            .unwrap_or(0.0);

        Some(ProductBalance {
            product_id,
            as_of,
            quantity,
            unit_value,
            total_value: quantity * unit_value,
            movements_applied: 0,
            origin: BalanceOrigin::CurrentTable,
        })
    }
}
