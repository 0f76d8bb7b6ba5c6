//! Sales export extraction
//!
//! Reads the flat CSV export, cleans its columns and splits every line into
//! the per-table record batches the load plan consumes.

pub mod clean;

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use salesload_common::{CommonError, Result};

use crate::error::LoadError;
use crate::schema;
use crate::types::{RecordBatch, Row, TableDescriptor, Value};

pub use clean::CleanRecord;

/// One line of the export as it appears in the file.
///
/// Columns missing from the header read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    #[serde(rename = "contract number")]
    pub contract_number: String,
    #[serde(rename = "client enterprise")]
    pub client_enterprise: String,
    #[serde(rename = "supply center")]
    pub supply_center: String,
    pub country: String,
    pub city: String,
    pub industry: String,
    #[serde(rename = "product code")]
    pub product_code: String,
    #[serde(rename = "product name")]
    pub product_name: String,
    #[serde(rename = "product model")]
    pub product_model: String,
    #[serde(rename = "unit price")]
    pub unit_price: String,
    pub quantity: String,
    #[serde(rename = "contract date")]
    pub contract_date: String,
    #[serde(rename = "estimated delivery date")]
    pub estimated_delivery_date: String,
    #[serde(rename = "lodgement date")]
    pub lodgement_date: String,
    pub director: String,
    pub salesman: String,
    #[serde(rename = "salesman number")]
    pub salesman_number: String,
    pub gender: String,
    pub age: String,
    #[serde(rename = "mobile phone")]
    pub mobile_phone: String,
}

/// Read every line of a CSV export with a header row
pub fn read_records<R: Read>(reader: R) -> Result<Vec<SourceRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    rdr.deserialize()
        .map(|record| record.map_err(CommonError::from))
        .collect()
}

pub fn read_path(path: &Path) -> Result<Vec<SourceRecord>> {
    if !path.exists() {
        return Err(CommonError::SourceNotFound(path.display().to_string()));
    }
    let file = File::open(path)?;
    read_records(file)
}

/// Clean the lines and build one batch per target table
pub fn build_batches(records: Vec<SourceRecord>) -> std::result::Result<Vec<RecordBatch>, LoadError> {
    let records: Vec<CleanRecord> = records.into_iter().map(CleanRecord::from).collect();

    let batches = vec![
        distinct(schema::supply_center()?, &records, |r| {
            crate::row![r.supply_center.as_str(), r.director.as_str()]
        }),
        distinct(schema::product()?, &records, |r| {
            crate::row![r.product_code.as_str(), r.product_name.as_str()]
        }),
        distinct(schema::sales()?, &records, |r| {
            crate::row![
                r.salesman_number,
                r.salesman.as_str(),
                r.gender.as_str(),
                r.mobile_phone.as_str(),
                r.age
            ]
        }),
        distinct(schema::client()?, &records, |r| {
            crate::row![
                r.client_enterprise.as_str(),
                r.country.as_str(),
                r.supply_center.as_str(),
                r.city.as_str(),
                r.industry.as_str()
            ]
        }),
        distinct(schema::product_model()?, &records, |r| {
            crate::row![r.product_code.as_str(), r.product_model.as_str(), r.unit_price.clone()]
        }),
        distinct(schema::contract()?, &records, |r| {
            crate::row![r.contract_number.as_str(), r.client_enterprise.as_str(), r.contract_date]
        }),
        RecordBatch::new(
            schema::order_detail()?,
            records.iter().map(order_line).collect(),
        ),
    ];

    for batch in &batches {
        info!(table = batch.table(), rows = batch.len(), "Prepared batch");
    }

    Ok(batches)
}

/// Read, clean and split a CSV export in one step
pub fn extract_file(path: &Path) -> anyhow::Result<Vec<RecordBatch>> {
    use anyhow::Context;

    let records = read_path(path).with_context(|| format!("Failed to read {}", path.display()))?;
    info!(path = %path.display(), records = records.len(), "Read sales export");
    build_batches(records).context("Failed to build record batches")
}

fn order_line(r: &CleanRecord) -> Row {
    Row::new(vec![
        Value::from(r.contract_number.as_str()),
        Value::from(r.product_code.as_str()),
        Value::from(r.product_model.as_str()),
        Value::from(r.quantity),
        Value::from(r.estimated_delivery_date),
        Value::from(r.lodgement_date),
        Value::from(r.salesman_number),
    ])
}

/// Project every record and keep each distinct row once, first seen first
fn distinct<F>(descriptor: TableDescriptor, records: &[CleanRecord], project: F) -> RecordBatch
where
    F: Fn(&CleanRecord) -> Row,
{
    let mut seen = HashSet::new();
    let rows = records
        .iter()
        .map(project)
        .filter(|row| seen.insert(row.clone()))
        .collect();
    RecordBatch::new(descriptor, rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    const SAMPLE: &str = "\
contract number,client enterprise,supply center,country,city,industry,product code,product name,product model,unit price,quantity,contract date,estimated delivery date,lodgement date,director,salesman,salesman number,gender,age,mobile phone
CSE0000106,Amazon,America,USA,Seattle,Internet,A50L172,Smart TV,SmartTVH7,250.5,3,2022/01/05,2022-02-01,,Alice,Mia,11201121,Female,30,13800000000
CSE0000106,Amazon,America,USA,Seattle,Internet,A50L172,Smart TV,SmartTVH9,300,1,2022/01/05,2022-02-01,,Alice,Mia,11201121,Female,30,13800000000
CSE0000107,Tesla,America,,Austin,Automobile,A50L172,Smart TV,SmartTVH7,250.5,x,05/01/2022,,,Alice,Leo,11201122,Male,41,13900000000
";

    fn batches() -> Vec<RecordBatch> {
        build_batches(read_records(SAMPLE.as_bytes()).unwrap()).unwrap()
    }

    fn batch<'a>(batches: &'a [RecordBatch], table: &str) -> &'a RecordBatch {
        batches.iter().find(|b| b.table() == table).unwrap()
    }

    #[test]
    fn test_read_records_maps_headers() {
        let records = read_records(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].client_enterprise, "Amazon");
        assert_eq!(records[2].country, "");
        assert_eq!(records[0].mobile_phone, "13800000000");
    }

    #[test]
    fn test_missing_columns_read_as_empty() {
        let records = read_records("contract number,quantity\nCSE1,4\n".as_bytes()).unwrap();
        assert_eq!(records[0].contract_number, "CSE1");
        assert_eq!(records[0].director, "");
    }

    #[test]
    fn test_batches_deduplicate_in_first_seen_order() {
        let batches = batches();
        assert_eq!(batches.len(), 7);

        assert_eq!(batch(&batches, "supply_center").rows, vec![crate::row!["America", "Alice"]]);
        assert_eq!(batch(&batches, "product").len(), 1);
        assert_eq!(batch(&batches, "product_model").len(), 2);
        assert_eq!(batch(&batches, "client").len(), 2);
        assert_eq!(batch(&batches, "contract").len(), 2);

        let sales = batch(&batches, "sales");
        assert_eq!(sales.rows[0].values()[0], Value::Integer(11201121));
        assert_eq!(sales.rows[1].values()[1], Value::text("Leo"));
    }

    #[test]
    fn test_order_lines_are_not_deduplicated() {
        let batches = batches();
        let orders = batch(&batches, "order_detail");
        assert_eq!(orders.len(), 3);

        let last = orders.rows[2].values();
        assert_eq!(last[3], Value::Integer(0));
        assert_eq!(last[4], Value::Null);
        assert_eq!(
            orders.rows[0].values()[4],
            Value::Date(NaiveDate::from_ymd_opt(2022, 2, 1).unwrap())
        );
    }

    #[test]
    fn test_batches_match_their_descriptors() {
        for batch in batches() {
            batch.descriptor.check_rows(&batch.rows).unwrap();
        }
    }

    #[test]
    fn test_read_path_missing_file() {
        let err = read_path(Path::new("/nonexistent/sales.csv")).unwrap_err();
        assert!(matches!(err, CommonError::SourceNotFound(_)));
    }

    #[test]
    fn test_extract_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let batches = extract_file(file.path()).unwrap();
        assert_eq!(batch(&batches, "order_detail").len(), 3);
    }
}
