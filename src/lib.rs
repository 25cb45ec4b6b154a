#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod convert;
pub mod enrich;
pub mod error;
pub mod formats;
pub mod links;
pub mod logging;
pub mod metadata_update;
pub mod ocr;
pub mod pipeline;
pub mod retry;
pub mod store;
