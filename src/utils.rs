use chrono::{Months, NaiveDate};

/// Parses a date as the ledger API serves it. Accepts ISO dates, ISO
/// datetimes (date part only is kept) and the legacy `DD/MM/YYYY` form.
pub fn parse_ledger_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    // Datetime payloads: keep the date prefix.
    if trimmed.len() > 10 {
        if let Ok(date) = NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d") {
            return Some(date);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").ok()
}

/// Parses a numeric string, tolerating the decimal-comma form
/// (`"1.234,56"`) some ledger endpoints emit.
pub fn parse_loose_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(n) = trimmed.parse::<f64>() {
        return n.is_finite().then_some(n);
    }

    if trimmed.contains(',') {
        let normalized = trimmed.replace('.', "").replace(',', ".");
        if let Ok(n) = normalized.parse::<f64>() {
            return n.is_finite().then_some(n);
        }
    }

    None
}

/// Start of the bounded fetch window ending at `as_of`.
pub fn lookback_start(as_of: NaiveDate, months: u32) -> NaiveDate {
    as_of
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}
