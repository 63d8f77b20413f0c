#![allow(dead_code)]

use std::path::Path;

use ledger_ingest::catalog::Catalog;
use ledger_ingest::model::RawSheet;
use rust_xlsxwriter::Workbook;
use serde_json::{Value, json};

pub const LEGACY_SALES: &str = "EBM LEGACY SALES V10";
pub const BANK_STATEMENT: &str = "BANK STATEMENT";
pub const PURCHASES: &str = "PURCHASES REGISTER";

pub const LEGACY_HEADERS: [&str; 8] = [
    "Invoice No",
    "SDC No",
    "Buyer Tin",
    "Buyer Name",
    "Date",
    "Unit Price",
    "Quantity",
    "Total Amount",
];

pub fn catalog_document() -> Value {
    json!({
        "categories": [
            {
                "id": LEGACY_SALES,
                "source_headers": LEGACY_HEADERS,
                "canonical_headers": [
                    "INVOICE NUMBER", "SDC ID", "BUYER TIN", "BUYER NAME",
                    "TRANSACTION DATE", "UNIT PRICE", "QUANTITY", "TOTAL AMOUNT"
                ],
                "data_group": "EBM",
                "category_group": "EBM SALES",
                "statement_group": "SALES",
                "duplicate_keys": ["INVOICE NUMBER", "SDC ID"],
                "transforms": [
                    { "kind": "sign_exchange", "price": "UNIT PRICE", "quantity": "QUANTITY" }
                ]
            },
            {
                "id": BANK_STATEMENT,
                "source_headers": ["Value Date", "Narration", "Debit", "Credit", "Balance"],
                "canonical_headers": ["TRANSACTION DATE", "DESCRIPTION", "DEBIT", "CREDIT", "BALANCE"],
                "data_group": "BANK",
                "statement_group": "BANK"
            },
            {
                "id": PURCHASES,
                "source_headers": ["Supplier Name", "Supplier Tin", "Invoice Date", "Amount"],
                "canonical_headers": ["SUPPLIER NAME", "SUPPLIER TIN", "TRANSACTION DATE", "AMOUNT"],
                "statement_group": "COGS-EXPENSES",
                "duplicate_keys": ["SUPPLIER TIN", "AMOUNT"]
            }
        ],
        "field_types": {
            "float": ["UNIT PRICE", "QUANTITY", "TOTAL AMOUNT", "DEBIT", "CREDIT", "BALANCE", "AMOUNT"],
            "date": ["TRANSACTION DATE"]
        }
    })
}

pub fn catalog() -> Catalog {
    catalog_from(catalog_document())
}

pub fn catalog_from(document: Value) -> Catalog {
    Catalog::from_json_str(&document.to_string()).expect("catalog fixture is valid")
}

/// Adds extra categories to the base fixture document.
pub fn catalog_with(categories: Vec<Value>) -> Catalog {
    let mut document = catalog_document();
    let list = document["categories"]
        .as_array_mut()
        .expect("categories is an array");
    list.extend(categories);
    catalog_from(document)
}

pub fn sheet(name: &str, rows: &[&[&str]]) -> RawSheet {
    RawSheet::from_strings(name, rows.iter().map(|row| row.iter().copied()))
}

/// A cell written into a fixture workbook.
#[derive(Debug, Clone)]
pub enum Fx {
    Text(&'static str),
    Number(f64),
    Blank,
}

pub fn text(value: &'static str) -> Fx {
    Fx::Text(value)
}

pub fn number(value: f64) -> Fx {
    Fx::Number(value)
}

pub fn write_workbook(path: &Path, sheets: &[(&str, Vec<Vec<Fx>>)]) {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).expect("sheet name");
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let (row, col) = (row_idx as u32, col_idx as u16);
                match cell {
                    Fx::Text(value) => {
                        worksheet.write_string(row, col, *value).expect("string cell");
                    }
                    Fx::Number(value) => {
                        worksheet.write_number(row, col, *value).expect("number cell");
                    }
                    Fx::Blank => {}
                }
            }
        }
    }
    workbook.save(path).expect("fixture workbook saved");
}

pub fn legacy_header_row() -> Vec<Fx> {
    LEGACY_HEADERS.iter().map(|header| Fx::Text(*header)).collect()
}
