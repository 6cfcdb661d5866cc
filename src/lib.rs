//! Market sizing over the public registry of training organisations: reads
//! the registry workbook, derives the target market and writes Markdown/CSV
//! reports.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod reports;
pub mod services;
