//! MCP Server implementation using rmcp

use crate::dataset::{dataset_statistics, parse_dataset, Record};
use crate::pdf::{
    fill_acroform, inspect_form_fields, mapping_coverage, render_report, MappingCoverage,
    PdfAssembler, ReportContext,
};
use crate::source::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, DocumentCache, ResolvedSource,
};
use crate::template::{sample_record, validate_batch, validate_record, MappingRules};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, service::RequestContext, tool, tool_handler, tool_router, RoleServer,
    ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Input source specification (fillable PDFs and JSON datasets)
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum SourceRef {
    /// File path (absolute or relative)
    Path {
        /// Path to the file
        path: String,
    },
    /// Base64 encoded data
    Base64 {
        /// Base64 encoded content
        base64: String,
    },
    /// URL to download from
    Url {
        /// URL of the file
        url: String,
    },
    /// Reference to cached data
    CacheRef {
        /// Cache key from previous operation
        cache_key: String,
    },
}

impl<'de> serde::Deserialize<'de> for SourceRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        const EXPECTED: &str =
            "an object with one of \"path\", \"base64\", \"url\", or \"cache_key\"";

        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            let got = match &value {
                serde_json::Value::Array(_) => "an array",
                serde_json::Value::String(_) => "a string",
                serde_json::Value::Number(_) => "a number",
                serde_json::Value::Bool(_) => "a boolean",
                serde_json::Value::Null => "null",
                serde_json::Value::Object(_) => "an object",
            };
            return Err(DeError::custom(format!(
                "Invalid source: expected {}, but got {}",
                EXPECTED, got
            )));
        };

        for discriminator in ["path", "base64", "url", "cache_key"] {
            let Some(raw) = obj.get(discriminator) else {
                continue;
            };
            let Some(text) = raw.as_str() else {
                return Err(DeError::custom(format!(
                    "\"{}\" must be a string",
                    discriminator
                )));
            };
            let text = text.to_string();
            return Ok(match discriminator {
                "path" => SourceRef::Path { path: text },
                "base64" => SourceRef::Base64 { base64: text },
                "url" => SourceRef::Url { url: text },
                _ => SourceRef::CacheRef { cache_key: text },
            });
        }

        Err(DeError::custom(format!(
            "Invalid source: expected {}, but got keys: {:?}",
            EXPECTED,
            obj.keys().collect::<Vec<_>>()
        )))
    }
}

/// Security and resource configuration for the field mapper server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the mapping rules JSON file (built-in defaults when None)
    pub rules_path: Option<String>,
    /// Directories files may be read from and written to
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Maximum total bytes in cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of cache entries (default: 100)
    pub cache_max_entries: usize,
    /// Maximum records per validate/statistics/generate batch (default: 500)
    pub max_batch_records: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024,
            cache_max_bytes: 512 * 1024 * 1024,
            cache_max_entries: 100,
            max_batch_records: 500,
        }
    }
}

/// PDF field mapper server
#[derive(Clone)]
pub struct MapperServer {
    rules: Arc<MappingRules>,
    cache: Arc<RwLock<DocumentCache>>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for list_templates
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ListTemplatesParams {}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TemplateSummary {
    /// Template name (the key used by other tools)
    pub name: String,
    /// Display title
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub description: String,
    /// Total number of fields
    pub field_count: u32,
    /// Number of required fields
    pub required_count: u32,
    /// Compliance regimes the template is designed for
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compliance: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListTemplatesResult {
    /// Mapping rules version
    pub version: String,
    pub templates: Vec<TemplateSummary>,
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for describe_template
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DescribeTemplateParams {
    /// Template name (see list_templates)
    pub template: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DescribeTemplateResult {
    pub template: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compliance: Vec<String>,
    /// Field specifications, keyed by dataset key
    pub fields: serde_json::Value,
    /// Synthesized example record that passes validation
    pub example_record: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for export_template_schema
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportTemplateSchemaParams {
    /// Template name (see list_templates)
    pub template: String,
    /// Output file path (optional). If provided, writes the schema JSON to this path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ExportTemplateSchemaResult {
    pub template: String,
    /// Self-describing schema document
    pub schema: serde_json::Value,
    /// Path where the schema was saved (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for validate_records
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateRecordsParams {
    /// Template name (see list_templates)
    pub template: String,
    /// Records to validate, inline
    #[serde(default)]
    pub records: Option<Vec<serde_json::Value>>,
    /// JSON dataset source (alternative to inline records)
    #[serde(default)]
    pub dataset: Option<SourceRef>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct IssueResponse {
    /// Dataset key the issue concerns
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RecordReportResponse {
    /// Zero-based record position
    pub index: u32,
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<IssueResponse>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct IssueFrequencyResponse {
    pub message: String,
    pub count: u32,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BatchSummaryResponse {
    pub total_records: u32,
    pub valid_records: u32,
    pub invalid_records: u32,
    /// Issue messages ordered by descending frequency
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub common_issues: Vec<IssueFrequencyResponse>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ValidateRecordsResult {
    pub template: String,
    /// Dataset source name when records came from a source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub reports: Vec<RecordReportResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummaryResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for dataset_statistics
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DatasetStatisticsParams {
    /// Template name (see list_templates)
    pub template: String,
    /// Records to analyze, inline
    #[serde(default)]
    pub records: Option<Vec<serde_json::Value>>,
    /// JSON dataset source (alternative to inline records)
    #[serde(default)]
    pub dataset: Option<SourceRef>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FieldStatsResponse {
    /// Dataset key
    pub field: String,
    /// Field kind
    pub kind: String,
    /// Records with a non-blank value
    pub filled: u32,
    /// Records with a missing or blank value
    pub empty: u32,
    /// Percentage of records with a non-blank value
    pub fill_rate: f64,
    pub distinct_count: u32,
    /// Distinct non-blank values, sorted
    pub distinct_values: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DatasetStatisticsResult {
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub total_records: u32,
    pub fields: Vec<FieldStatsResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummaryResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for generate_documents
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateDocumentsParams {
    /// Template name (see list_templates)
    pub template: String,
    /// Records to render, inline
    #[serde(default)]
    pub records: Option<Vec<serde_json::Value>>,
    /// JSON dataset source (alternative to inline records)
    #[serde(default)]
    pub dataset: Option<SourceRef>,
    /// Merge all generated documents into a single PDF (default: false)
    #[serde(default)]
    pub merge: bool,
    /// Password protect the output(s) with this user password
    #[serde(default)]
    pub user_password: Option<String>,
    /// Owner password for protected outputs (defaults to user_password)
    #[serde(default)]
    pub owner_password: Option<String>,
    /// Output file path for the merged PDF (requires merge: true)
    #[serde(default)]
    pub output_path: Option<String>,
    /// Directory to write one PDF per record into (ignored when merging)
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GeneratedDocumentInfo {
    /// Zero-based record position
    pub record_index: u32,
    pub valid: bool,
    /// Validation issues for records that were skipped
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<IssueResponse>,
    /// Cache key of the generated PDF (absent for skipped records)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Path where this document was saved (if output_dir was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GenerateDocumentsResult {
    pub template: String,
    pub documents: Vec<GeneratedDocumentInfo>,
    /// Number of documents generated
    pub total_generated: u32,
    /// Number of records skipped for validation failures
    pub total_skipped: u32,
    /// Whether outputs were password protected
    pub encrypted: bool,
    /// Cache key of the merged PDF (when merge: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_page_count: Option<u32>,
    /// Path where the merged PDF was saved (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for inspect_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InspectFormParams {
    /// Fillable PDF to inspect
    pub source: SourceRef,
    /// Template name to compute mapping coverage against (optional)
    #[serde(default)]
    pub template: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Enable caching of the input PDF
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FormFieldOptionResponse {
    /// Display label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Whether this option is currently selected
    pub is_selected: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FormFieldResponse {
    /// Page number (1-indexed)
    pub page: u32,
    /// Field name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Field type (text, checkbox, radio_button, combo_box, list_box, push_button, signature, unknown)
    pub field_type: String,
    /// Current value (for text fields)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether checked (for checkbox/radio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_checked: Option<bool>,
    pub is_read_only: bool,
    pub is_required: bool,
    /// Available options (for combo_box/list_box)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FormFieldOptionResponse>>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FieldMappingResponse {
    /// Dataset key
    pub key: String,
    /// Target AcroForm field name
    pub pdf_field: String,
    pub kind: String,
    pub required: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CoverageResponse {
    /// Template fields whose target widget exists in the PDF
    pub mapped: Vec<FieldMappingResponse>,
    /// Template fields with no matching widget
    pub missing: Vec<FieldMappingResponse>,
    /// Widget names no template field targets
    pub unmapped_pdf_fields: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct InspectFormResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub fields: Vec<FormFieldResponse>,
    pub total_fields: u32,
    /// Mapping coverage (when a template was supplied)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillFormParams {
    /// Template name (see list_templates)
    pub template: String,
    /// Record to map onto the form
    pub record: serde_json::Value,
    /// Fillable PDF containing the form fields
    pub source: SourceRef,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Output file path (optional). If provided, saves the filled PDF to this path.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Fill even if the record fails validation (default: false)
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SkippedFieldResponse {
    /// Field name
    pub name: String,
    /// Reason the field was skipped
    pub reason: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FillFormResult {
    /// Source identifier
    pub source: String,
    pub template: String,
    /// Validation issues for the record (fill proceeds only when empty or forced)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<IssueResponse>,
    /// Cache key of the filled PDF (for chaining operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    /// Number of fields successfully filled
    pub fields_filled: u32,
    /// Fields that could not be filled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields_skipped: Vec<SkippedFieldResponse>,
    /// Number of pages in the output PDF
    pub output_page_count: u32,
    /// Path where the filled PDF was saved (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for list_outputs
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListOutputsParams {
    /// Directory to search for generated PDF files
    pub directory: String,
    /// Search subdirectories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Filename pattern to filter (e.g., "intake_form*.pdf"). Supports glob patterns.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct OutputFileInfo {
    /// Full path to the PDF file
    pub path: String,
    /// Filename only
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (ISO 8601 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListOutputsResult {
    /// Directory that was searched
    pub directory: String,
    /// PDF files found
    pub files: Vec<OutputFileInfo>,
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl MapperServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server with a specific mapping rules file
    pub fn with_rules_path(rules_path: String) -> Self {
        Self::with_config(ServerConfig {
            rules_path: Some(rules_path),
            ..ServerConfig::default()
        })
    }

    /// Create a server with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let rules = MappingRules::load_or_default(config.rules_path.as_deref());
        let cache = DocumentCache::new(config.cache_max_entries, config.cache_max_bytes);
        Self {
            rules: Arc::new(rules),
            cache: Arc::new(RwLock::new(cache)),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// List available templates
    #[tool(
        description = "List the document templates available in the mapping rules. Returns each template's name, title, category, field counts, and compliance tags. Template names are the keys accepted by the other tools."
    )]
    async fn list_templates(&self, Parameters(_params): Parameters<ListTemplatesParams>) -> String {
        let result = self.process_list_templates();
        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Describe one template in full
    #[tool(
        description = "Describe a template in full: every field with its kind, label, constraints (required, max_length, pattern, options, numeric bounds), and the AcroForm field it maps onto, plus an example record that passes validation."
    )]
    async fn describe_template(
        &self,
        Parameters(params): Parameters<DescribeTemplateParams>,
    ) -> String {
        let result = self.process_describe_template(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "describe_template failed");
            DescribeTemplateResult {
                template: params.template.clone(),
                title: String::new(),
                description: String::new(),
                category: None,
                compliance: vec![],
                fields: serde_json::Value::Null,
                example_record: serde_json::Value::Null,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Export a template schema document
    #[tool(
        description = "Export a self-describing JSON schema document for a template: field specifications, rules version, and an example record. Optionally writes the document to a file."
    )]
    async fn export_template_schema(
        &self,
        Parameters(params): Parameters<ExportTemplateSchemaParams>,
    ) -> String {
        let result = self
            .process_export_template_schema(&params)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "export_template_schema failed");
                ExportTemplateSchemaResult {
                    template: params.template.clone(),
                    schema: serde_json::Value::Null,
                    output_path: None,
                    error: Some(e.client_message()),
                }
            });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Validate records against a template
    #[tool(
        description = "Validate records against a template's field rules. Checks required fields, value kinds (email, phone, date, number bounds, select options, booleans), lengths, and patterns. Reports every issue per record plus a batch summary.

Records may be passed inline via \"records\" or loaded from a JSON dataset via \"dataset\" ({\"path\": ...}, {\"url\": ...}, {\"base64\": ...}, or {\"cache_key\": ...}). A dataset is either an array of record objects or an object with a \"records\" array."
    )]
    async fn validate_records(
        &self,
        Parameters(params): Parameters<ValidateRecordsParams>,
    ) -> String {
        let result = self.process_validate_records(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "validate_records failed");
            ValidateRecordsResult {
                template: params.template.clone(),
                source: None,
                reports: vec![],
                summary: None,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Compute per-field statistics over a dataset
    #[tool(
        description = "Compute per-field statistics over a dataset for a template: fill rates, empty counts, and distinct values per field, plus a validation summary of the batch.

Records may be passed inline via \"records\" or loaded from a JSON dataset via \"dataset\"."
    )]
    async fn dataset_statistics(
        &self,
        Parameters(params): Parameters<DatasetStatisticsParams>,
    ) -> String {
        let result = self
            .process_dataset_statistics(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "dataset_statistics failed");
                DatasetStatisticsResult {
                    template: params.template.clone(),
                    source: None,
                    total_records: 0,
                    fields: vec![],
                    summary: None,
                    error: Some(e.client_message()),
                }
            });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Generate PDF reports from records
    #[tool(
        description = "Generate one PDF report per record from a template. Invalid records are skipped and reported with their issues; valid records are rendered into formatted report documents.

Options:
- merge: combine all generated documents into a single PDF
- user_password/owner_password: password protect the output(s)
- output_path: write the merged PDF to a file (requires merge)
- output_dir: write one PDF per record into a directory

Every generated document is cached (cache_key) for chaining with other tools."
    )]
    async fn generate_documents(
        &self,
        Parameters(params): Parameters<GenerateDocumentsParams>,
    ) -> String {
        let result = self
            .process_generate_documents(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "generate_documents failed");
                GenerateDocumentsResult {
                    template: params.template.clone(),
                    documents: vec![],
                    total_generated: 0,
                    total_skipped: 0,
                    encrypted: false,
                    merged_cache_key: None,
                    merged_page_count: None,
                    merged_output_path: None,
                    error: Some(e.client_message()),
                }
            });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Inspect the AcroForm fields of a fillable PDF
    #[tool(
        description = "Inspect the AcroForm fields of a fillable PDF: names, types, current values, and options. When a template name is supplied, also reports mapping coverage: which template fields resolve to an existing PDF field and which widgets are unmapped.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn inspect_form(&self, Parameters(params): Parameters<InspectFormParams>) -> String {
        let result = self.process_inspect_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "inspect_form failed");
            InspectFormResult {
                source: Self::source_name(&params.source),
                cache_key: None,
                fields: vec![],
                total_fields: 0,
                coverage: None,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Fill a fillable PDF from a record
    #[tool(
        description = "Fill the AcroForm fields of a PDF from a record, using a template's field mapping (each field's pdf_field, defaulting to the dataset key). The record is validated first; validation failures abort the fill unless force is set.

Supports text fields, checkboxes, and radio buttons. Unmatched or unwritable fields are reported as skipped. The output is always cached (output_cache_key) for chaining with other tools.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn fill_form(&self, Parameters(params): Parameters<FillFormParams>) -> String {
        let result = self.process_fill_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_form failed");
            FillFormResult {
                source: Self::source_name(&params.source),
                template: params.template.clone(),
                validation_issues: vec![],
                output_cache_key: None,
                fields_filled: 0,
                fields_skipped: vec![],
                output_page_count: 0,
                output_path: None,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// List generated PDF files in a directory
    #[tool(
        description = "List PDF files in a directory, typically the output directory of earlier generate_documents or fill_form calls. Returns each file's path, name, size, and last modified time. Supports recursive search and glob pattern filtering (e.g. \"intake_form*.pdf\")."
    )]
    async fn list_outputs(&self, Parameters(params): Parameters<ListOutputsParams>) -> String {
        let result = self.process_list_outputs(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "list_outputs failed");
            ListOutputsResult {
                directory: params.directory.clone(),
                files: vec![],
                total_count: 0,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }
}

// ============================================================================
// Processing methods (testable without the MCP transport)
// ============================================================================

impl MapperServer {
    fn source_name(source: &SourceRef) -> String {
        match source {
            SourceRef::Path { path } => path.clone(),
            SourceRef::Base64 { .. } => "<base64>".to_string(),
            SourceRef::Url { url } => url.clone(),
            SourceRef::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    async fn resolve_source(&self, source: &SourceRef) -> crate::error::Result<ResolvedSource> {
        match source {
            SourceRef::Path { path } => {
                self.validate_path_access(path)?;
                resolve_path(path)
            }
            SourceRef::Base64 { base64 } => resolve_base64(base64),
            SourceRef::Url { url } => {
                resolve_url(
                    url,
                    self.config.allow_private_urls,
                    self.config.max_download_bytes,
                )
                .await
            }
            SourceRef::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache).await,
        }
    }

    /// True when the canonical path sits inside one of the configured
    /// resource directories
    fn inside_resource_dirs(&self, canonical: &Path) -> bool {
        self.config.resource_dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|allowed| canonical.starts_with(&allowed))
                .unwrap_or(false)
        })
    }

    /// Check read access for an existing path. An empty sandbox allows
    /// everything.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let denied = || crate::error::Error::PathAccessDenied {
            path: path.to_string(),
        };

        let canonical = std::fs::canonicalize(path).map_err(|_| denied())?;
        if self.inside_resource_dirs(&canonical) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }

    /// Check write access for an output path. The file may not exist yet,
    /// so its parent directory is canonicalized instead.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let denied = || crate::error::Error::PathAccessDenied {
            path: path.to_string(),
        };

        let target = Path::new(path);
        let parent = target.parent().unwrap_or(Path::new("."));
        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| denied())?;
        let file_name = target.file_name().ok_or_else(denied)?;

        let candidate = canonical_parent.join(file_name);
        if self.inside_resource_dirs(&candidate) {
            Ok(candidate)
        } else {
            Err(denied())
        }
    }

    /// Write output data to a file path, with sandbox validation
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        if let Some(path_str) = output_path {
            let target = self.validate_output_path_access(path_str)?;
            std::fs::write(&target, data).map_err(crate::error::Error::Io)?;
            tracing::info!(path = %target.display(), bytes = data.len(), "wrote output file");
            Ok(Some(target.display().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Resolve the records for a batch tool call: inline records win, a
    /// dataset source is the alternative. Enforces the batch limit.
    async fn resolve_records(
        &self,
        records: &Option<Vec<serde_json::Value>>,
        dataset: &Option<SourceRef>,
    ) -> crate::error::Result<(Vec<Record>, Option<String>)> {
        let (records, source_name) = match (records, dataset) {
            (Some(inline), _) => {
                let mut converted = Vec::with_capacity(inline.len());
                for (i, value) in inline.iter().enumerate() {
                    match value.as_object() {
                        Some(obj) => converted.push(obj.clone()),
                        None => {
                            return Err(crate::error::Error::InvalidDataset {
                                reason: format!("record {} is not an object", i),
                            })
                        }
                    }
                }
                (converted, None)
            }
            (None, Some(source)) => {
                let resolved = self.resolve_source(source).await?;
                let records = parse_dataset(&resolved.data)?;
                (records, Some(resolved.source_name))
            }
            (None, None) => {
                return Err(crate::error::Error::InvalidDataset {
                    reason: "provide either \"records\" or \"dataset\"".to_string(),
                })
            }
        };

        if records.len() > self.config.max_batch_records {
            return Err(crate::error::Error::BatchTooLarge {
                count: records.len(),
                max: self.config.max_batch_records,
            });
        }

        Ok((records, source_name))
    }

    pub fn process_list_templates(&self) -> ListTemplatesResult {
        let templates: Vec<TemplateSummary> = self
            .rules
            .templates
            .iter()
            .map(|(name, template)| TemplateSummary {
                name: name.clone(),
                title: template.title.clone(),
                category: template.category.clone(),
                description: template.description.clone(),
                field_count: template.fields.len() as u32,
                required_count: template.required_count() as u32,
                compliance: template.compliance.clone(),
            })
            .collect();

        ListTemplatesResult {
            version: self.rules.version.clone(),
            total_count: templates.len() as u32,
            templates,
            error: None,
        }
    }

    pub fn process_describe_template(
        &self,
        params: &DescribeTemplateParams,
    ) -> crate::error::Result<DescribeTemplateResult> {
        let template = self.rules.get(&params.template)?;
        let example = sample_record(template);

        Ok(DescribeTemplateResult {
            template: params.template.clone(),
            title: template.title.clone(),
            description: template.description.clone(),
            category: template.category.clone(),
            compliance: template.compliance.clone(),
            fields: serde_json::to_value(&template.fields)?,
            example_record: serde_json::Value::Object(example),
            error: None,
        })
    }

    pub fn process_export_template_schema(
        &self,
        params: &ExportTemplateSchemaParams,
    ) -> crate::error::Result<ExportTemplateSchemaResult> {
        let schema = self.rules.schema_document(&params.template)?;

        let output_path = if params.output_path.is_some() {
            let pretty = serde_json::to_vec_pretty(&schema)?;
            self.write_output(&params.output_path, &pretty)?
        } else {
            None
        };

        Ok(ExportTemplateSchemaResult {
            template: params.template.clone(),
            schema,
            output_path,
            error: None,
        })
    }

    pub async fn process_validate_records(
        &self,
        params: &ValidateRecordsParams,
    ) -> crate::error::Result<ValidateRecordsResult> {
        let template = self.rules.get(&params.template)?;
        let (records, source) = self.resolve_records(&params.records, &params.dataset).await?;

        let (reports, summary) = validate_batch(template, &records);

        Ok(ValidateRecordsResult {
            template: params.template.clone(),
            source,
            reports: reports.into_iter().map(record_report_response).collect(),
            summary: Some(batch_summary_response(&summary)),
            error: None,
        })
    }

    pub async fn process_dataset_statistics(
        &self,
        params: &DatasetStatisticsParams,
    ) -> crate::error::Result<DatasetStatisticsResult> {
        let template = self.rules.get(&params.template)?;
        let (records, source) = self.resolve_records(&params.records, &params.dataset).await?;

        let stats = dataset_statistics(template, &records);
        let (_, summary) = validate_batch(template, &records);

        Ok(DatasetStatisticsResult {
            template: params.template.clone(),
            source,
            total_records: records.len() as u32,
            fields: stats
                .into_iter()
                .map(|s| FieldStatsResponse {
                    field: s.field,
                    kind: s.kind,
                    filled: s.filled as u32,
                    empty: s.empty as u32,
                    fill_rate: s.fill_rate,
                    distinct_count: s.distinct_count as u32,
                    distinct_values: s.distinct_values,
                })
                .collect(),
            summary: Some(batch_summary_response(&summary)),
            error: None,
        })
    }

    pub async fn process_generate_documents(
        &self,
        params: &GenerateDocumentsParams,
    ) -> crate::error::Result<GenerateDocumentsResult> {
        let template = self.rules.get(&params.template)?.clone();
        let (records, _source) = self.resolve_records(&params.records, &params.dataset).await?;

        let record_count = records.len();
        let version = self.rules.version.clone();
        let user_password = params.user_password.clone();
        let owner_password = params.owner_password.clone();
        let merge = params.merge;
        let encrypted = user_password.is_some();

        // Validate inline, render and assemble in spawn_blocking (PDFium and
        // qpdf work is CPU-bound)
        let mut documents: Vec<GeneratedDocumentInfo> = Vec::with_capacity(record_count);
        let mut renderable: Vec<(usize, Record)> = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let issues = validate_record(&template, &record);
            if issues.is_empty() {
                documents.push(GeneratedDocumentInfo {
                    record_index: index as u32,
                    valid: true,
                    issues: vec![],
                    cache_key: None,
                    page_count: None,
                    size_bytes: None,
                    output_path: None,
                });
                renderable.push((index, record));
            } else {
                tracing::debug!(record = index, issues = issues.len(), "skipping invalid record");
                documents.push(GeneratedDocumentInfo {
                    record_index: index as u32,
                    valid: false,
                    issues: issues.into_iter().map(issue_response).collect(),
                    cache_key: None,
                    page_count: None,
                    size_bytes: None,
                    output_path: None,
                });
            }
        }

        let total_generated = renderable.len() as u32;
        let total_skipped = record_count as u32 - total_generated;

        let template_for_render = template.clone();
        let (rendered, merged) = tokio::task::spawn_blocking(move || {
            let mut rendered: Vec<(usize, Vec<u8>, u32)> = Vec::with_capacity(renderable.len());

            for (index, record) in &renderable {
                let ctx = ReportContext {
                    version: version.clone(),
                    record_number: index + 1,
                    record_count,
                };
                let mut bytes = render_report(&template_for_render, record, &ctx)?;
                if !merge {
                    if let Some(pwd) = user_password.as_deref() {
                        bytes = PdfAssembler::protect(&bytes, pwd, owner_password.as_deref())?;
                    }
                }
                let pages = PdfAssembler::page_count(&bytes)?;
                rendered.push((*index, bytes, pages));
            }

            let merged = if merge && !rendered.is_empty() {
                let inputs: Vec<&[u8]> = rendered.iter().map(|(_, b, _)| b.as_slice()).collect();
                let mut merged_bytes = PdfAssembler::merge(&inputs)?;
                if let Some(pwd) = user_password.as_deref() {
                    merged_bytes = PdfAssembler::protect(&merged_bytes, pwd, owner_password.as_deref())?;
                }
                let pages = PdfAssembler::page_count(&merged_bytes)?;
                Some((merged_bytes, pages))
            } else {
                None
            };

            Ok::<_, crate::error::Error>((rendered, merged))
        })
        .await
        .map_err(join_error)??;

        // Cache every generated document and write requested files
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        {
            let cache_guard = self.cache.write().await;
            for (index, bytes, pages) in &rendered {
                let key = cache_guard.generate_unique_key();
                cache_guard.put(key.clone(), bytes.clone());

                if let Some(doc) = documents.iter_mut().find(|d| d.record_index == *index as u32) {
                    doc.cache_key = Some(key);
                    doc.page_count = Some(*pages);
                    doc.size_bytes = Some(bytes.len() as u64);
                }
            }
        }

        if !merge {
            if let Some(dir) = &params.output_dir {
                for (index, bytes, _) in &rendered {
                    let file_name =
                        format!("{}_record{:03}_{}.pdf", params.template, index + 1, timestamp);
                    let path = Path::new(dir).join(file_name).display().to_string();
                    let written = self.write_output(&Some(path), bytes)?;
                    if let Some(doc) =
                        documents.iter_mut().find(|d| d.record_index == *index as u32)
                    {
                        doc.output_path = written;
                    }
                }
            }
        }

        let (merged_cache_key, merged_page_count, merged_output_path) = match merged {
            Some((bytes, pages)) => {
                let key = {
                    let cache_guard = self.cache.write().await;
                    let key = cache_guard.generate_unique_key();
                    cache_guard.put(key.clone(), bytes.clone());
                    key
                };
                let written = self.write_output(&params.output_path, &bytes)?;
                (Some(key), Some(pages), written)
            }
            None => (None, None, None),
        };

        Ok(GenerateDocumentsResult {
            template: params.template.clone(),
            documents,
            total_generated,
            total_skipped,
            encrypted,
            merged_cache_key,
            merged_page_count,
            merged_output_path,
            error: None,
        })
    }

    pub fn process_list_outputs(
        &self,
        params: &ListOutputsParams,
    ) -> crate::error::Result<ListOutputsResult> {
        // The read sandbox applies to listing directories too
        self.validate_path_access(&params.directory)?;

        let dir_path = Path::new(&params.directory);

        if !dir_path.exists() {
            return Err(crate::error::Error::SourceNotFound {
                path: params.directory.clone(),
            });
        }

        if !dir_path.is_dir() {
            return Err(crate::error::Error::SourceResolution {
                reason: format!("{} is not a directory", params.directory),
            });
        }

        let mut files = Vec::new();

        let pattern = params
            .pattern
            .as_ref()
            .and_then(|p| glob::Pattern::new(p).ok());

        Self::collect_pdf_files(dir_path, params.recursive, &pattern, &mut files)?;

        // Sort by path for consistent ordering
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let total_count = files.len() as u32;

        Ok(ListOutputsResult {
            directory: params.directory.clone(),
            files,
            total_count,
            error: None,
        })
    }

    fn collect_pdf_files(
        root: &Path,
        recursive: bool,
        pattern: &Option<glob::Pattern>,
        files: &mut Vec<OutputFileInfo>,
    ) -> crate::error::Result<()> {
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            // An unreadable root is an error; unreadable subdirectories
            // are skipped
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if dir.as_path() == root => return Err(crate::error::Error::Io(e)),
                Err(_) => continue,
            };

            for entry in entries.flatten() {
                let path = entry.path();

                if path.is_dir() {
                    if recursive {
                        pending.push(path);
                    }
                    continue;
                }

                let is_pdf = path
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"));
                if !is_pdf {
                    continue;
                }

                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if let Some(pat) = pattern {
                    if !pat.matches(&name) {
                        continue;
                    }
                }

                let metadata = std::fs::metadata(&path).ok();
                files.push(OutputFileInfo {
                    path: path.to_string_lossy().to_string(),
                    name,
                    size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                    modified: metadata
                        .as_ref()
                        .and_then(|m| m.modified().ok())
                        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
                });
            }
        }

        Ok(())
    }

    pub async fn process_inspect_form(
        &self,
        params: &InspectFormParams,
    ) -> crate::error::Result<InspectFormResult> {
        let template = match &params.template {
            Some(name) => Some(self.rules.get(name)?.clone()),
            None => None,
        };

        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();

        // Cache if requested
        let cache_key = if params.cache {
            let cache_guard = self.cache.write().await;
            let key = cache_guard.generate_unique_key();
            cache_guard.put(key.clone(), resolved.data.clone());
            Some(key)
        } else {
            None
        };

        let data = resolved.data;
        let password = params.password.clone();

        let (fields, coverage) = tokio::task::spawn_blocking(move || {
            let fields = inspect_form_fields(&data, password.as_deref())?;
            let coverage = template.as_ref().map(|t| mapping_coverage(t, &fields));
            Ok::<_, crate::error::Error>((fields, coverage))
        })
        .await
        .map_err(join_error)??;

        let total_fields = fields.len() as u32;

        Ok(InspectFormResult {
            source: source_name,
            cache_key,
            fields: fields
                .into_iter()
                .map(|f| FormFieldResponse {
                    page: f.page,
                    name: f.name,
                    field_type: f.field_type,
                    value: f.value,
                    is_checked: f.is_checked,
                    is_read_only: f.is_read_only,
                    is_required: f.is_required,
                    options: f.options.map(|opts| {
                        opts.into_iter()
                            .map(|o| FormFieldOptionResponse {
                                label: o.label,
                                is_selected: o.is_selected,
                            })
                            .collect()
                    }),
                })
                .collect(),
            total_fields,
            coverage: coverage.map(coverage_response),
            error: None,
        })
    }

    pub async fn process_fill_form(
        &self,
        params: &FillFormParams,
    ) -> crate::error::Result<FillFormResult> {
        let template = self.rules.get(&params.template)?.clone();

        let record = params
            .record
            .as_object()
            .cloned()
            .ok_or_else(|| crate::error::Error::InvalidDataset {
                reason: "record must be an object".to_string(),
            })?;

        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();

        // Validate before touching the PDF; an invalid record aborts the
        // fill unless forced
        let issues = validate_record(&template, &record);
        if !issues.is_empty() && !params.force {
            tracing::warn!(
                template = %params.template,
                issues = issues.len(),
                "fill_form rejected invalid record"
            );
            return Ok(FillFormResult {
                source: source_name,
                template: params.template.clone(),
                validation_issues: issues.into_iter().map(issue_response).collect(),
                output_cache_key: None,
                fields_filled: 0,
                fields_skipped: vec![],
                output_page_count: 0,
                output_path: None,
                error: Some(
                    "Record failed validation; set force to fill anyway".to_string(),
                ),
            });
        }

        let data = resolved.data;
        let password = params.password.clone();
        let template_for_fill = template.clone();
        let record_for_fill = record.clone();

        let (output_data, outcome, output_page_count) = tokio::task::spawn_blocking(move || {
            let (output_data, outcome) = fill_acroform(
                &data,
                password.as_deref(),
                &template_for_fill,
                &record_for_fill,
            )?;
            let output_page_count = PdfAssembler::page_count(&output_data).unwrap_or(0);
            Ok::<_, crate::error::Error>((output_data, outcome, output_page_count))
        })
        .await
        .map_err(join_error)??;

        // Always cache the output for chaining operations
        let output_cache_key = {
            let cache_guard = self.cache.write().await;
            let key = cache_guard.generate_unique_key();
            cache_guard.put(key.clone(), output_data.clone());
            key
        };

        let output_path = self.write_output(&params.output_path, &output_data)?;

        Ok(FillFormResult {
            source: source_name,
            template: params.template.clone(),
            validation_issues: issues.into_iter().map(issue_response).collect(),
            output_cache_key: Some(output_cache_key),
            fields_filled: outcome.fields_filled,
            fields_skipped: outcome
                .fields_skipped
                .into_iter()
                .map(|s| SkippedFieldResponse {
                    name: s.name,
                    reason: s.reason,
                })
                .collect(),
            output_page_count,
            output_path,
            error: None,
        })
    }
}

/// Blocking tasks carry only PDF engine work; a join failure reports as one
fn join_error(e: tokio::task::JoinError) -> crate::error::Error {
    crate::error::Error::Pdfium {
        reason: format!("Task join error: {}", e),
    }
}

fn issue_response(issue: crate::template::ValidationIssue) -> IssueResponse {
    IssueResponse {
        field: issue.field,
        message: issue.message,
    }
}

fn record_report_response(report: crate::template::RecordReport) -> RecordReportResponse {
    RecordReportResponse {
        index: report.index as u32,
        valid: report.valid,
        issues: report.issues.into_iter().map(issue_response).collect(),
    }
}

fn batch_summary_response(summary: &crate::template::BatchSummary) -> BatchSummaryResponse {
    BatchSummaryResponse {
        total_records: summary.total_records as u32,
        valid_records: summary.valid_records as u32,
        invalid_records: summary.invalid_records as u32,
        common_issues: summary
            .common_issues
            .iter()
            .map(|f| IssueFrequencyResponse {
                message: f.message.clone(),
                count: f.count,
            })
            .collect(),
    }
}

fn coverage_response(coverage: MappingCoverage) -> CoverageResponse {
    let mapping = |m: crate::pdf::FieldMapping| FieldMappingResponse {
        key: m.key,
        pdf_field: m.pdf_field,
        kind: m.kind,
        required: m.required,
    };
    CoverageResponse {
        mapped: coverage.mapped.into_iter().map(mapping).collect(),
        missing: coverage.missing.into_iter().map(mapping).collect(),
        unmapped_pdf_fields: coverage.unmapped_pdf_fields,
    }
}

impl Default for MapperServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for MapperServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF Field Mapper validates structured records against document templates, \
                 generates PDF reports, and fills PDF forms. Templates are exposed as \
                 template:// resources; start with list_templates."
                    .into(),
            ),
        }
    }

    /// List templates as resources
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let mut resources = Vec::new();

        for (name, template) in &self.rules.templates {
            let uri = format!("template://{}", name);
            let mut resource = RawResource::new(uri, template.title.clone());
            resource.mime_type = Some("application/json".to_string());
            resource.description = Some(format!(
                "{} ({} fields, {} required)",
                template.description,
                template.fields.len(),
                template.required_count()
            ));

            resources.push(Annotated {
                raw: resource,
                annotations: None,
            });
        }

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Read a template resource as its exported schema document
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = &request.uri;

        let name = match uri.strip_prefix("template://") {
            Some(name) => name,
            None => {
                return Err(ErrorData::invalid_params(
                    "Only template:// URIs are supported",
                    None,
                ))
            }
        };

        match self.rules.schema_document(name) {
            Ok(schema) => {
                let text = serde_json::to_string_pretty(&schema).unwrap_or_default();
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::TextResourceContents {
                        uri: uri.clone(),
                        mime_type: Some("application/json".to_string()),
                        text,
                        meta: Default::default(),
                    }],
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "read_resource failed");
                Err(ErrorData::invalid_params(e.client_message(), None))
            }
        }
    }
}

/// Run the MCP server with built-in default rules
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with a specific mapping rules file
pub async fn run_server_with_rules(rules_path: String) -> Result<()> {
    run_server_with_config(ServerConfig {
        rules_path: Some(rules_path),
        ..ServerConfig::default()
    })
    .await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = MapperServer::with_config(config);

    tracing::info!("PDF Field Mapper ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_name() {
        let cases = [
            (
                SourceRef::Path {
                    path: "/forms/intake.pdf".to_string(),
                },
                "/forms/intake.pdf",
            ),
            (
                SourceRef::Base64 {
                    base64: "JVBERi0=".to_string(),
                },
                "<base64>",
            ),
            (
                SourceRef::Url {
                    url: "https://example.com/intake.pdf".to_string(),
                },
                "https://example.com/intake.pdf",
            ),
            (
                SourceRef::CacheRef {
                    cache_key: "k-42".to_string(),
                },
                "<cache:k-42>",
            ),
        ];
        for (source, expected) in cases {
            assert_eq!(MapperServer::source_name(&source), expected);
        }
    }

    #[test]
    fn test_source_ref_deserialization() {
        let source: SourceRef = serde_json::from_str(r#"{"path": "/form.pdf"}"#).unwrap();
        assert!(matches!(source, SourceRef::Path { .. }));

        let source: SourceRef = serde_json::from_str(r#"{"cache_key": "k"}"#).unwrap();
        assert!(matches!(source, SourceRef::CacheRef { .. }));

        let err = serde_json::from_str::<SourceRef>(r#"{"nope": 1}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid source"));

        let err = serde_json::from_str::<SourceRef>(r#""just a string""#).unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.rules_path.is_none());
        assert!(config.resource_dirs.is_empty());
        assert!(!config.allow_private_urls);
        assert_eq!(config.max_download_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache_max_bytes, 512 * 1024 * 1024);
        assert_eq!(config.cache_max_entries, 100);
        assert_eq!(config.max_batch_records, 500);
    }

    #[test]
    fn test_list_templates_defaults() {
        let server = MapperServer::new();
        let result = server.process_list_templates();
        assert_eq!(result.total_count, 2);
        assert!(result.templates.iter().any(|t| t.name == "medical_form"));
        assert!(result.templates.iter().any(|t| t.name == "employee_form"));
    }

    #[test]
    fn test_describe_unknown_template() {
        let server = MapperServer::new();
        let result = server.process_describe_template(&DescribeTemplateParams {
            template: "missing".to_string(),
        });
        assert!(matches!(
            result,
            Err(crate::error::Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_describe_template_example_validates() {
        let server = MapperServer::new();
        let result = server
            .process_describe_template(&DescribeTemplateParams {
                template: "medical_form".to_string(),
            })
            .unwrap();
        assert!(result.example_record.is_object());
        assert!(result.fields.is_object());
    }

    #[tokio::test]
    async fn test_validate_records_inline() {
        let server = MapperServer::new();
        let params = ValidateRecordsParams {
            template: "medical_form".to_string(),
            records: Some(vec![
                json!({
                    "patient_name": "John Michael Smith",
                    "patient_id": "P123456",
                    "date_of_birth": "1985-06-15",
                    "gender": "Male"
                }),
                json!({"patient_id": "BROKEN"}),
            ]),
            dataset: None,
        };
        let result = server.process_validate_records(&params).await.unwrap();
        assert_eq!(result.reports.len(), 2);
        assert!(result.reports[0].valid);
        assert!(!result.reports[1].valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.valid_records, 1);
        assert_eq!(summary.invalid_records, 1);
    }

    #[tokio::test]
    async fn test_validate_records_requires_input() {
        let server = MapperServer::new();
        let params = ValidateRecordsParams {
            template: "medical_form".to_string(),
            records: None,
            dataset: None,
        };
        let result = server.process_validate_records(&params).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::InvalidDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_records_rejects_non_object() {
        let server = MapperServer::new();
        let params = ValidateRecordsParams {
            template: "medical_form".to_string(),
            records: Some(vec![json!(42)]),
            dataset: None,
        };
        let result = server.process_validate_records(&params).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::InvalidDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_limit_enforced() {
        let server = MapperServer::with_config(ServerConfig {
            max_batch_records: 2,
            ..ServerConfig::default()
        });
        let params = ValidateRecordsParams {
            template: "medical_form".to_string(),
            records: Some(vec![json!({}), json!({}), json!({})]),
            dataset: None,
        };
        let result = server.process_validate_records(&params).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::BatchTooLarge { count: 3, max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_statistics_inline() {
        let server = MapperServer::new();
        let params = DatasetStatisticsParams {
            template: "medical_form".to_string(),
            records: Some(vec![
                json!({"patient_name": "A"}),
                json!({"patient_name": "B"}),
                json!({}),
            ]),
            dataset: None,
        };
        let result = server.process_dataset_statistics(&params).await.unwrap();
        assert_eq!(result.total_records, 3);
        let name = result
            .fields
            .iter()
            .find(|f| f.field == "patient_name")
            .unwrap();
        assert_eq!(name.filled, 2);
        assert_eq!(name.distinct_count, 2);
    }

    #[tokio::test]
    async fn test_generate_documents_all_invalid_skips_rendering() {
        // No valid records means no PDFium work; only skip reports come back
        let server = MapperServer::new();
        let params = GenerateDocumentsParams {
            template: "medical_form".to_string(),
            records: Some(vec![json!({"patient_id": "BROKEN"})]),
            dataset: None,
            merge: false,
            user_password: None,
            owner_password: None,
            output_path: None,
            output_dir: None,
        };
        let result = server.process_generate_documents(&params).await.unwrap();
        assert_eq!(result.total_generated, 0);
        assert_eq!(result.total_skipped, 1);
        assert_eq!(result.documents.len(), 1);
        assert!(!result.documents[0].valid);
        assert!(!result.documents[0].issues.is_empty());
        assert!(result.merged_cache_key.is_none());
    }

    #[tokio::test]
    async fn test_fill_form_rejects_invalid_record() {
        let server = MapperServer::new();
        // Base64 of "%PDF-" so source resolution succeeds without touching
        // PDFium; validation fails first
        let params = FillFormParams {
            template: "medical_form".to_string(),
            record: json!({"patient_id": "BROKEN"}),
            source: SourceRef::Base64 {
                base64: "JVBERi0=".to_string(),
            },
            password: None,
            output_path: None,
            force: false,
        };
        let result = server.process_fill_form(&params).await.unwrap();
        assert!(result.output_cache_key.is_none());
        assert!(!result.validation_issues.is_empty());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_fill_form_rejects_non_object_record() {
        let server = MapperServer::new();
        let params = FillFormParams {
            template: "medical_form".to_string(),
            record: json!("not an object"),
            source: SourceRef::Base64 {
                base64: "JVBERi0=".to_string(),
            },
            password: None,
            output_path: None,
            force: false,
        };
        let result = server.process_fill_form(&params).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::InvalidDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_inspect_form_unknown_template() {
        let server = MapperServer::new();
        let params = InspectFormParams {
            source: SourceRef::Base64 {
                base64: "JVBERi0=".to_string(),
            },
            template: Some("missing".to_string()),
            password: None,
            cache: false,
        };
        let result = server.process_inspect_form(&params).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_list_outputs_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"%PDF-").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let server = MapperServer::with_config(ServerConfig {
            resource_dirs: vec![dir.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });

        let result = server
            .process_list_outputs(&ListOutputsParams {
                directory: dir.path().to_string_lossy().to_string(),
                recursive: false,
                pattern: None,
            })
            .unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.files[0].name, "report.pdf");

        let denied = server.process_list_outputs(&ListOutputsParams {
            directory: "/tmp".to_string(),
            recursive: false,
            pattern: None,
        });
        assert!(matches!(
            denied,
            Err(crate::error::Error::PathAccessDenied { .. })
        ));
    }

    #[test]
    fn test_list_outputs_pattern_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intake_form_record001.pdf"), b"%PDF-").unwrap();
        std::fs::write(dir.path().join("employee_form_record001.pdf"), b"%PDF-").unwrap();

        let server = MapperServer::new();
        let result = server
            .process_list_outputs(&ListOutputsParams {
                directory: dir.path().to_string_lossy().to_string(),
                recursive: false,
                pattern: Some("intake_form*.pdf".to_string()),
            })
            .unwrap();
        assert_eq!(result.total_count, 1);
        assert!(result.files[0].name.starts_with("intake_form"));
    }

    #[test]
    fn test_output_path_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let server = MapperServer::with_config(ServerConfig {
            resource_dirs: vec![dir.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });

        let inside = dir.path().join("out.pdf");
        assert!(server
            .validate_output_path_access(&inside.to_string_lossy())
            .is_ok());

        let result = server.validate_output_path_access("/tmp/evil.pdf");
        assert!(matches!(
            result,
            Err(crate::error::Error::PathAccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_source_path_sandboxed_denied() {
        let dir = tempfile::tempdir().unwrap();
        let server = MapperServer::with_config(ServerConfig {
            resource_dirs: vec![dir.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });

        let outside = {
            let mut p = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            p.push("Cargo.toml");
            p
        };
        let source = SourceRef::Path {
            path: outside.to_string_lossy().to_string(),
        };
        let result = server.resolve_source(&source).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::PathAccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_export_schema_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = MapperServer::new();
        let out = dir.path().join("schema.json");
        let params = ExportTemplateSchemaParams {
            template: "employee_form".to_string(),
            output_path: Some(out.to_string_lossy().to_string()),
        };
        let result = server.process_export_template_schema(&params).unwrap();
        assert!(result.output_path.is_some());

        let written = std::fs::read(&out).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(parsed["template"], "employee_form");
        assert!(parsed["example_record"].is_object());
    }

    #[test]
    fn test_params_deserialization() {
        let json = r#"{
            "template": "medical_form",
            "records": [{"patient_name": "A"}]
        }"#;
        let params: ValidateRecordsParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.template, "medical_form");
        assert_eq!(params.records.unwrap().len(), 1);
        assert!(params.dataset.is_none());
    }

    #[test]
    fn test_generate_params_defaults() {
        let json = r#"{"template": "medical_form", "records": []}"#;
        let params: GenerateDocumentsParams = serde_json::from_str(json).unwrap();
        assert!(!params.merge);
        assert!(params.user_password.is_none());
        assert!(params.output_dir.is_none());
    }
}
