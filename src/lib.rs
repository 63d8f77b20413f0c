//! Core library for the ledger-ingest command line application.
//!
//! The engine recognises the layout of heterogeneous financial spreadsheet
//! exports, maps them onto canonical schemas and analyses the result. Readers
//! and writers live under [`ledger::ingest::io`], the data representations in
//! [`ledger::ingest::model`], the schema catalog in [`ledger::ingest::catalog`],
//! header recognition in [`ledger::ingest::matcher`], typing in
//! [`ledger::ingest::normalize`], the category transforms under
//! [`ledger::ingest::postprocess`], and batch orchestration in
//! [`ledger::ingest::pipeline`].

pub mod ledger;

pub use ledger::ingest::{
    IngestError, Result, analysis, catalog, config, duplicates, error, expr, io, logging, matcher,
    model, normalize, pipeline, postprocess,
};
