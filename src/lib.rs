//! PDF Field Mapper Library
//!
//! This crate provides MCP tools for mapping structured data onto PDFs:
//! - `list_templates` / `describe_template`: explore the mapping rules
//! - `validate_records`: validate datasets against a template
//! - `dataset_statistics`: per-field fill rates and distinct values
//! - `generate_documents`: render records into PDF reports
//! - `inspect_form` / `fill_form`: AcroForm discovery and filling

pub mod dataset;
pub mod error;
pub mod pdf;
pub mod server;
pub mod source;
pub mod template;

pub use error::{Error, Result};
pub use server::{
    run_server, run_server_with_config, run_server_with_rules, MapperServer, ServerConfig,
    SourceRef,
};
pub use template::{MappingRules, Template};
