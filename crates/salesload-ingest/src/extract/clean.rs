//! Column cleaning for the sales export
//!
//! The export mixes date layouts and carries blanks in numeric columns.
//! Cleaning never fails: dates that cannot be read become NULL, numbers
//! that cannot be read become zero.

use std::str::FromStr;

use chrono::NaiveDate;
use sqlx::types::BigDecimal;
use tracing::debug;

use super::SourceRecord;

/// Date layouts tried in order; day-first wins over month-first
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y%m%d", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

/// A source line with typed, cleaned columns
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub contract_number: String,
    pub client_enterprise: String,
    pub supply_center: String,
    pub country: String,
    pub city: String,
    pub industry: String,
    pub product_code: String,
    pub product_name: String,
    pub product_model: String,
    pub unit_price: BigDecimal,
    pub quantity: i64,
    pub contract_date: Option<NaiveDate>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub lodgement_date: Option<NaiveDate>,
    pub director: String,
    pub salesman: String,
    pub salesman_number: i64,
    pub gender: String,
    pub age: i64,
    pub mobile_phone: String,
}

impl From<SourceRecord> for CleanRecord {
    fn from(r: SourceRecord) -> Self {
        Self {
            unit_price: coerce_decimal(&r.unit_price),
            quantity: coerce_integer(&r.quantity),
            contract_date: clean_date(&r.contract_date),
            estimated_delivery_date: clean_date(&r.estimated_delivery_date),
            lodgement_date: clean_date(&r.lodgement_date),
            salesman_number: coerce_integer(&r.salesman_number),
            age: coerce_integer(&r.age),
            contract_number: r.contract_number,
            client_enterprise: r.client_enterprise,
            supply_center: r.supply_center,
            country: r.country,
            city: r.city,
            industry: r.industry,
            product_code: r.product_code,
            product_name: r.product_name,
            product_model: r.product_model,
            director: r.director,
            salesman: r.salesman,
            gender: r.gender,
            mobile_phone: r.mobile_phone,
        }
    }
}

/// Parse the date part of `raw` (text before the first space)
pub fn clean_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let date_part = raw.split(' ').next().unwrap_or(raw);
    let parsed = DATE_FORMATS.iter().find_map(|fmt| match *fmt {
        "%Y%m%d" => parse_compact(date_part),
        fmt => NaiveDate::parse_from_str(date_part, fmt).ok(),
    });

    if parsed.is_none() {
        debug!(value = raw, "Unparseable date; storing NULL");
    }
    parsed
}

/// `YYYYMMDD` with exactly eight digits
fn parse_compact(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = s[0..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Integer value of `raw`; fractional input is truncated, anything else is 0
pub fn coerce_integer(raw: &str) -> i64 {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return i;
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => f.trunc() as i64,
        _ => 0,
    }
}

/// Decimal value of `raw`, or 0 when blank or malformed
pub fn coerce_decimal(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw.trim()).unwrap_or_else(|_| BigDecimal::from(0))
}
