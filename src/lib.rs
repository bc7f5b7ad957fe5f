//! hr-sheet-import: spreadsheet ingestion for HR registry, payroll and
//! overtime sheets.
//!
//! A file goes through [`excel::read_source`], the sheet-kind transformer in
//! [`transform`], the row rules in [`validate`] and, before anything is
//! written, the period check in [`conflict`]. [`pipeline::ImportSession`]
//! strings these together against a [`store::RecordStore`].

pub mod cache;
pub mod config;
pub mod conflict;
pub mod error;
pub mod excel;
pub mod format;
pub mod headers;
pub mod pipeline;
pub mod store;
pub mod transform;
pub mod types;
pub mod validate;
