use crate::api::types::RawBalanceRow;
use crate::error::{BalanceReplayError, Result};
use crate::schema::RawMovement;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// HTTP client for the dashboard backend's ledger endpoints.
#[derive(Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl LedgerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Fetches raw stock movements for a date range, optionally restricted
    /// to a set of products. One batched call per query; the server may
    /// return rows out of order and with malformed entries — both are the
    /// normalizer's problem, not an error here.
    pub async fn fetch_movements(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        product_ids: Option<&[String]>,
    ) -> Result<Vec<RawMovement>> {
        let mut query = vec![
            ("from".to_string(), date_from.format("%Y-%m-%d").to_string()),
            ("to".to_string(), date_to.format("%Y-%m-%d").to_string()),
        ];
        if let Some(products) = product_ids.filter(|p| !p.is_empty()) {
            query.push(("products".to_string(), products.join(",")));
        }
        self.get_rows("movements", &query).await
    }

    /// Fetches the authoritative current balance table. May legitimately
    /// return no rows even when movements exist.
    pub async fn fetch_current_balances(
        &self,
        product_ids: Option<&[String]>,
    ) -> Result<Vec<RawBalanceRow>> {
        let mut query = Vec::new();
        if let Some(products) = product_ids.filter(|p| !p.is_empty()) {
            query.push(("products".to_string(), products.join(",")));
        }
        self.get_rows("balances/current", &query).await
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {} with {} query params", url, query.len());

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BalanceReplayError::LedgerStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body = response.text().await?;
        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            BalanceReplayError::MalformedPayload(format!("Body is not JSON: {}", e))
        })?;
        let rows = extract_rows(payload)?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    BalanceReplayError::MalformedPayload(format!("Row did not deserialize: {}", e))
                })
            })
            .collect()
    }
}

/// The endpoints wrap their row arrays inconsistently: some return a bare
/// array, others an object with a `data`/`items`/`rows` field.
fn extract_rows(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => {
            for key in ["data", "items", "rows"] {
                if let Some(Value::Array(rows)) = map.remove(key) {
                    return Ok(rows);
                }
            }
            Err(BalanceReplayError::MalformedPayload(
                "Expected an array of rows or an object wrapping one".to_string(),
            ))
        }
        other => Err(BalanceReplayError::MalformedPayload(format!(
            "Expected an array of rows, got {}",
            other
        ))),
    }
}
