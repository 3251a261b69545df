use crate::api::client::LedgerClient;
use crate::api::types::RawBalanceRow;
use crate::error::Result;
use crate::query::{build_report, merge_current_and_replayed, plan_query, QueryPlan};
use crate::replay_balances;
use crate::schema::{BalanceReport, ProductBalance, QueryConfig, RawMovement, ReplayOptions};
use crate::utils::lookback_start;
use chrono::{Local, NaiveDate};
use log::info;
use std::collections::BTreeSet;

/// The two fetches the facade consumes. Implemented by `LedgerClient` and
/// by in-memory fixtures in tests.
#[allow(async_fn_in_trait)]
pub trait LedgerSource {
    async fn movements(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<Vec<RawMovement>>;

    async fn current_balances(&self, products: Option<&[String]>)
        -> Result<Vec<RawBalanceRow>>;
}

impl LedgerSource for LedgerClient {
    async fn movements(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<Vec<RawMovement>> {
        self.fetch_movements(date_from, date_to, products).await
    }

    async fn current_balances(
        &self,
        products: Option<&[String]>,
    ) -> Result<Vec<RawBalanceRow>> {
        self.fetch_current_balances(products).await
    }
}

/// Single entry point for point-in-time balance queries: decides between
/// the authoritative current balance table and historical replay, performs
/// one batched fetch per needed source, and returns the uniform report.
pub struct BalanceService<S> {
    source: S,
    config: QueryConfig,
    options: ReplayOptions,
}

impl<S: LedgerSource> BalanceService<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            config: QueryConfig::default(),
            options: ReplayOptions::default(),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_options(mut self, options: ReplayOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn balance_as_of(
        &self,
        as_of: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<BalanceReport> {
        self.balance_as_of_with_today(as_of, Local::now().date_naive(), products)
            .await
    }

    /// Same as `balance_as_of` with the current calendar date injected, so
    /// callers and tests never depend on the wall clock.
    pub async fn balance_as_of_with_today(
        &self,
        as_of: NaiveDate,
        today: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<BalanceReport> {
        info!(
            "Balance query as of {} ({} product filter)",
            as_of,
            products.map_or("no".to_string(), |p| p.len().to_string())
        );
        match plan_query(as_of, today, &self.config)? {
            QueryPlan::CurrentTable => self.current_with_fallback(today, products).await,
            QueryPlan::HistoricalReplay { window_start } => {
                self.replay_window(as_of, window_start, products).await
            }
        }
    }

    async fn replay_window(
        &self,
        as_of: NaiveDate,
        window_start: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<BalanceReport> {
        let raw = self.source.movements(window_start, as_of, products).await?;
        let filter = products.map(to_set);
        Ok(replay_balances(&raw, as_of, filter.as_ref(), &self.options))
    }

    /// Today-path. The current balance table is the system of record and
    /// wins wherever it has a row; replay covers the products it missed,
    /// because the table is sometimes empty or unpopulated while movements
    /// exist.
    async fn current_with_fallback(
        &self,
        today: NaiveDate,
        products: Option<&[String]>,
    ) -> Result<BalanceReport> {
        let rows = self.source.current_balances(products).await?;
        let mut diagnostics = Vec::new();
        let current: Vec<ProductBalance> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| row.into_balance(today, index, &mut diagnostics))
            .collect();

        // None = no fallback needed; Some(None) = replay everything;
        // Some(Some(ids)) = replay only the requested products the table
        // did not return.
        let fallback = match products {
            Some(requested) => {
                let have: BTreeSet<&str> =
                    current.iter().map(|b| b.product_id.as_str()).collect();
                let missing: Vec<String> = requested
                    .iter()
                    .filter(|p| !have.contains(p.as_str()))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then_some(Some(missing))
            }
            None if current.is_empty() => {
                diagnostics.push(
                    "Current balance table returned no rows; replaying movements instead"
                        .to_string(),
                );
                Some(None)
            }
            None => None,
        };

        let replayed = match fallback {
            Some(filter) => {
                let window_start = lookback_start(today, self.config.lookback_months);
                let raw = self
                    .source
                    .movements(window_start, today, filter.as_deref())
                    .await?;
                let set = filter.map(|ids| ids.iter().cloned().collect::<BTreeSet<_>>());
                let report = replay_balances(&raw, today, set.as_ref(), &self.options);
                diagnostics.extend(report.diagnostics);
                report.balances
            }
            None => Vec::new(),
        };

        let (balances, fallback_diagnostics) = merge_current_and_replayed(current, replayed);
        diagnostics.extend(fallback_diagnostics);
        Ok(build_report(today, balances, diagnostics))
    }
}

fn to_set(products: &[String]) -> BTreeSet<String> {
    products.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BalanceReplayError;
    use crate::schema::{BalanceOrigin, LooseNumber};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLedger {
        movements: Vec<RawMovement>,
        balances: Vec<RawBalanceRow>,
        unreachable: bool,
        movement_requests: Mutex<Vec<(NaiveDate, NaiveDate, Option<Vec<String>>)>>,
    }

    impl LedgerSource for FakeLedger {
        async fn movements(
            &self,
            date_from: NaiveDate,
            date_to: NaiveDate,
            products: Option<&[String]>,
        ) -> Result<Vec<RawMovement>> {
            if self.unreachable {
                return Err(BalanceReplayError::MalformedPayload(
                    "connection refused".to_string(),
                ));
            }
            self.movement_requests.lock().unwrap().push((
                date_from,
                date_to,
                products.map(<[String]>::to_vec),
            ));
            Ok(self
                .movements
                .iter()
                .filter(|m| match products {
                    Some(ids) => m
                        .product_id
                        .as_ref()
                        .is_some_and(|p| ids.contains(p)),
                    None => true,
                })
                .cloned()
                .collect())
        }

        async fn current_balances(
            &self,
            products: Option<&[String]>,
        ) -> Result<Vec<RawBalanceRow>> {
            if self.unreachable {
                return Err(BalanceReplayError::MalformedPayload(
                    "connection refused".to_string(),
                ));
            }
            Ok(self
                .balances
                .iter()
                .filter(|b| match products {
                    Some(ids) => b
                        .product_id
                        .as_ref()
                        .is_some_and(|p| ids.contains(p)),
                    None => true,
                })
                .cloned()
                .collect())
        }
    }

    fn movement(product: &str, date: &str, quantity: f64, reference: &str) -> RawMovement {
        RawMovement {
            product_id: Some(product.to_string()),
            date: Some(date.to_string()),
            quantity: Some(LooseNumber::Number(quantity)),
            unit_value: Some(LooseNumber::Number(2.0)),
            reference_code: Some(reference.to_string()),
            ..RawMovement::default()
        }
    }

    fn table_row(product: &str, quantity: f64) -> RawBalanceRow {
        RawBalanceRow {
            product_id: Some(product.to_string()),
            quantity: Some(LooseNumber::Number(quantity)),
            unit_value: Some(LooseNumber::Number(3.0)),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_historical_query_replays_windowed_movements() {
        let ledger = FakeLedger {
            movements: vec![
                movement("P1", "2025-06-01", 10.0, "123"),
                movement("P1", "2025-06-05", 50.0, "000000"),
                movement("P1", "2025-06-08", -6.0, "456"),
            ],
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger).with_config(QueryConfig { lookback_months: 3 });

        let report = service
            .balance_as_of_with_today(date(2025, 6, 10), date(2025, 8, 6), None)
            .await
            .unwrap();

        assert_eq!(report.balances.len(), 1);
        assert_eq!(report.balances[0].quantity, 44.0);
        assert_eq!(report.balances[0].origin, BalanceOrigin::Replayed);

        let requests = service.source.movement_requests.lock().unwrap();
        assert_eq!(requests[0].0, date(2025, 3, 10));
        assert_eq!(requests[0].1, date(2025, 6, 10));
    }

    #[tokio::test]
    async fn test_today_prefers_table_and_replays_missing_products() {
        // P1 is in the authoritative table; P2 only has movements.
        let ledger = FakeLedger {
            movements: vec![
                movement("P1", "2025-08-01", 99.0, "901"),
                movement("P2", "2025-08-02", 6.0, "902"),
            ],
            balances: vec![table_row("P1", 12.0)],
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger);
        let today = date(2025, 8, 6);
        let filter = vec!["P1".to_string(), "P2".to_string()];

        let report = service
            .balance_as_of_with_today(today, today, Some(&filter))
            .await
            .unwrap();

        assert_eq!(report.balances.len(), 2);
        let p1 = &report.balances[0];
        assert_eq!(p1.product_id, "P1");
        assert_eq!(p1.quantity, 12.0);
        assert_eq!(p1.origin, BalanceOrigin::CurrentTable);

        let p2 = &report.balances[1];
        assert_eq!(p2.product_id, "P2");
        assert_eq!(p2.quantity, 6.0);
        assert_eq!(p2.origin, BalanceOrigin::Replayed);

        // Fallback only fetched the products the table missed.
        let requests = service.source.movement_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].2.as_deref(), Some(&["P2".to_string()][..]));
    }

    #[tokio::test]
    async fn test_today_with_complete_table_skips_movement_fetch() {
        let ledger = FakeLedger {
            movements: vec![movement("P1", "2025-08-01", 99.0, "901")],
            balances: vec![table_row("P1", 12.0)],
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger);
        let today = date(2025, 8, 6);

        let report = service
            .balance_as_of_with_today(today, today, None)
            .await
            .unwrap();

        assert_eq!(report.balances.len(), 1);
        assert!(service.source.movement_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_today_with_empty_table_replays_everything() {
        let ledger = FakeLedger {
            movements: vec![
                movement("P1", "2025-08-01", 4.0, "901"),
                movement("P2", "2025-08-02", 6.0, "902"),
            ],
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger);
        let today = date(2025, 8, 6);

        let report = service
            .balance_as_of_with_today(today, today, None)
            .await
            .unwrap();

        assert_eq!(report.balances.len(), 2);
        assert!(report
            .balances
            .iter()
            .all(|b| b.origin == BalanceOrigin::Replayed));
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.contains("returned no rows")));
    }

    #[tokio::test]
    async fn test_requested_product_without_any_data_is_absent() {
        let ledger = FakeLedger {
            balances: vec![table_row("P1", 12.0)],
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger);
        let today = date(2025, 8, 6);
        let filter = vec!["P1".to_string(), "GHOST".to_string()];

        let report = service
            .balance_as_of_with_today(today, today, Some(&filter))
            .await
            .unwrap();

        assert_eq!(report.balances.len(), 1);
        assert_eq!(report.balances[0].product_id, "P1");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_a_typed_error_not_empty_result() {
        let ledger = FakeLedger {
            unreachable: true,
            ..FakeLedger::default()
        };
        let service = BalanceService::new(ledger);

        let result = service
            .balance_as_of_with_today(date(2025, 6, 10), date(2025, 8, 6), None)
            .await;
        assert!(result.is_err());
    }
}
