//! Target tables of the sales schema and their load order

use crate::error::LoadError;
use crate::plan::{LoadPlan, StageSpec};
use crate::types::{Column, TableDescriptor};

pub const SUPPLY_CENTER: &str = "supply_center";
pub const PRODUCT: &str = "product";
pub const SALES: &str = "sales";
pub const CLIENT: &str = "client";
pub const PRODUCT_MODEL: &str = "product_model";
pub const CONTRACT: &str = "contract";
pub const ORDER_DETAIL: &str = "order_detail";

fn key(columns: &[&str]) -> Option<Vec<String>> {
    Some(columns.iter().map(|c| c.to_string()).collect())
}

pub fn supply_center() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        SUPPLY_CENTER,
        vec![Column::text("center_name"), Column::text("director")],
        key(&["center_name"]),
    )
}

pub fn product() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        PRODUCT,
        vec![Column::text("product_code"), Column::text("product_name")],
        key(&["product_code"]),
    )
}

pub fn sales() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        SALES,
        vec![
            Column::integer("salesman_number"),
            Column::text("salesman_name"),
            Column::text("gender"),
            Column::text("mobile_number"),
            Column::integer("age"),
        ],
        key(&["salesman_number"]),
    )
}

pub fn client() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        CLIENT,
        vec![
            Column::text("client_name"),
            Column::text("country"),
            Column::text("supply_center"),
            Column::text("city"),
            Column::text("industry"),
        ],
        key(&["client_name"]),
    )
}

pub fn product_model() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        PRODUCT_MODEL,
        vec![
            Column::text("product_code"),
            Column::text("product_model"),
            Column::decimal("unit_price"),
        ],
        key(&["product_code", "product_model"]),
    )
}

pub fn contract() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        CONTRACT,
        vec![
            Column::text("contract_number"),
            Column::text("client_name"),
            Column::date("contract_date"),
        ],
        key(&["contract_number"]),
    )
}

/// Order lines have no natural key; a re-run appends them again
pub fn order_detail() -> Result<TableDescriptor, LoadError> {
    TableDescriptor::new(
        ORDER_DETAIL,
        vec![
            Column::text("contract_number"),
            Column::text("product_code"),
            Column::text("product_model"),
            Column::integer("quantity"),
            Column::date("estimated_delivery_date"),
            Column::date("lodgement_date"),
            Column::integer("salesman_number"),
        ],
        None,
    )
}

/// Every target table, in load order
pub fn all_tables() -> Result<Vec<TableDescriptor>, LoadError> {
    Ok(vec![
        supply_center()?,
        product()?,
        sales()?,
        client()?,
        product_model()?,
        contract()?,
        order_detail()?,
    ])
}

/// Base tables, then tables referencing them, then contracts, then order lines
pub fn default_layout() -> Result<LoadPlan, LoadError> {
    LoadPlan::new(vec![
        StageSpec::new("base", &[SUPPLY_CENTER, PRODUCT, SALES]),
        StageSpec::new("association", &[CLIENT, PRODUCT_MODEL]),
        StageSpec::new("contract", &[CONTRACT]),
        StageSpec::new("order_detail", &[ORDER_DETAIL]),
    ])
}
