//! pricefetch: load a product catalog, render each page headless, read the
//! price behind each row's XPath locator, and persist the catalog.

pub mod aggregate;
pub mod audit;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod extraction;
pub mod pipeline;
pub mod pool;
pub mod renderer;
pub mod report;
pub mod store;

pub use aggregate::{aggregate, FailedPricePolicy, Summary};
pub use catalog::{load_catalog, Catalog, ColumnNames, ItemRecord, RawTable, ValidationError};
pub use config::RuntimeConfig;
pub use extraction::{ExtractionEngine, ExtractionResult, ItemFailure, ItemStatus};
pub use pipeline::{BatchInput, BatchReport, Pipeline, PipelineContext, PipelineError};
pub use store::{Store, StoreWriter, WriteMode};
