//! AcroForm inspection and mapping-driven filling
//!
//! A fillable PDF carries named widgets; the template declares which dataset
//! key feeds which widget (via `pdf_field`, defaulting to the key itself).
//! Inspection enumerates the widgets, coverage reports how well a template
//! maps onto them, and filling writes a record's values into the document.

use crate::dataset::Record;
use crate::error::{Error, Result};
use crate::pdf::{create_pdfium, ensure_pdf_header, load_document};
use crate::template::validate::{is_blank, value_as_string};
use crate::template::{FieldKind, Template};
use pdfium_render::prelude::*;

/// One AcroForm field found in a PDF
#[derive(Debug, Clone)]
pub struct FormFieldInfo {
    /// Page number (1-indexed)
    pub page: u32,
    pub name: Option<String>,
    /// Widget kind (text, checkbox, radio_button, combo_box, list_box,
    /// push_button, signature, unknown)
    pub field_type: String,
    /// Current value (text widgets)
    pub value: Option<String>,
    /// Checked state (checkbox/radio widgets)
    pub is_checked: Option<bool>,
    pub is_read_only: bool,
    pub is_required: bool,
    /// Selectable options (combo/list widgets)
    pub options: Option<Vec<FormFieldOption>>,
}

/// Option entry of a combo/list widget
#[derive(Debug, Clone)]
pub struct FormFieldOption {
    pub label: Option<String>,
    pub is_selected: bool,
}

/// A template field resolved against the PDF's widgets
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Dataset key
    pub key: String,
    /// Target AcroForm field name
    pub pdf_field: String,
    pub kind: String,
    pub required: bool,
}

/// How a template's fields map onto a PDF's widgets
#[derive(Debug, Clone)]
pub struct MappingCoverage {
    /// Template fields whose target widget exists in the PDF
    pub mapped: Vec<FieldMapping>,
    /// Template fields with no matching widget
    pub missing: Vec<FieldMapping>,
    /// Widget names no template field targets
    pub unmapped_pdf_fields: Vec<String>,
}

/// A field that could not be written during a fill
#[derive(Debug, Clone)]
pub struct SkippedField {
    pub name: String,
    pub reason: String,
}

/// Result of filling a form
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub fields_filled: u32,
    pub fields_skipped: Vec<SkippedField>,
}

/// Value prepared for one widget
enum DesiredValue {
    Text(String),
    Checked(bool),
}

/// Enumerate the AcroForm fields of a PDF
pub fn inspect_form_fields(data: &[u8], password: Option<&str>) -> Result<Vec<FormFieldInfo>> {
    ensure_pdf_header(data)?;

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;

    let mut fields = Vec::new();
    let pages = document.pages();

    for page_index in 0..pages.len() {
        let page = pages.get(page_index).map_err(|e| Error::Pdfium {
            reason: format!("Failed to open page {}: {}", page_index + 1, e),
        })?;

        for annotation in page.annotations().iter() {
            if let Some(field) = annotation.as_form_field() {
                fields.push(classify_field(page_index as u32 + 1, field));
            }
        }
    }

    Ok(fields)
}

fn widget_options(options: &PdfFormFieldOptions) -> Option<Vec<FormFieldOption>> {
    let mut collected = Vec::new();
    for index in 0..options.len() {
        if let Ok(option) = options.get(index) {
            collected.push(FormFieldOption {
                label: option.label().cloned(),
                is_selected: option.is_set(),
            });
        }
    }
    (!collected.is_empty()).then_some(collected)
}

fn classify_field(page: u32, field: &PdfFormField) -> FormFieldInfo {
    let (field_type, value, is_checked, options) = if let Some(text) = field.as_text_field() {
        ("text", text.value(), None, None)
    } else if let Some(checkbox) = field.as_checkbox_field() {
        ("checkbox", None, checkbox.is_checked().ok(), None)
    } else if let Some(radio) = field.as_radio_button_field() {
        ("radio_button", None, radio.is_checked().ok(), None)
    } else if let Some(combo) = field.as_combo_box_field() {
        ("combo_box", None, None, widget_options(combo.options()))
    } else if let Some(list) = field.as_list_box_field() {
        ("list_box", None, None, widget_options(list.options()))
    } else if field.as_push_button_field().is_some() {
        ("push_button", None, None, None)
    } else if field.as_signature_field().is_some() {
        ("signature", None, None, None)
    } else {
        ("unknown", None, None, None)
    };

    FormFieldInfo {
        page,
        name: field.name(),
        field_type: field_type.to_string(),
        value,
        is_checked,
        is_read_only: false,
        is_required: false,
        options,
    }
}

/// Resolve a template's fields against the widgets found in a PDF
pub fn mapping_coverage(template: &Template, fields: &[FormFieldInfo]) -> MappingCoverage {
    let widget_names: Vec<&str> = fields
        .iter()
        .filter_map(|f| f.name.as_deref())
        .collect();

    let mut mapped = Vec::new();
    let mut missing = Vec::new();
    let mut targeted: Vec<&str> = Vec::new();

    for (key, spec) in template.fields.iter() {
        let target = template.pdf_field_name(key);
        let mapping = FieldMapping {
            key: key.to_string(),
            pdf_field: target.to_string(),
            kind: spec.kind.as_str().to_string(),
            required: spec.required,
        };
        if widget_names.contains(&target) {
            targeted.push(target);
            mapped.push(mapping);
        } else {
            missing.push(mapping);
        }
    }

    let mut unmapped: Vec<String> = widget_names
        .iter()
        .filter(|n| !targeted.iter().any(|t| t == *n))
        .map(|n| n.to_string())
        .collect();
    unmapped.sort();
    unmapped.dedup();

    MappingCoverage {
        mapped,
        missing,
        unmapped_pdf_fields: unmapped,
    }
}

/// Prepare the widget value for one record field, if it has one
fn desired_value(kind: FieldKind, value: &serde_json::Value) -> Option<DesiredValue> {
    if is_blank(value) {
        return None;
    }
    if kind.is_text_like() {
        Some(DesiredValue::Text(value_as_string(value)))
    } else {
        value.as_bool().map(DesiredValue::Checked)
    }
}

/// Fill a fillable PDF's AcroForm fields from a record, per the template
/// mapping, and return the modified PDF bytes.
///
/// Fields that cannot be written are reported as skipped with a reason;
/// widgets the record does not reference are left untouched.
pub fn fill_acroform(
    data: &[u8],
    password: Option<&str>,
    template: &Template,
    record: &Record,
) -> Result<(Vec<u8>, FillOutcome)> {
    ensure_pdf_header(data)?;

    let mut fields_skipped = Vec::new();

    // Resolve the record into (widget name, value) pairs up front
    let mut remaining: Vec<(String, DesiredValue)> = Vec::new();
    for (key, spec) in template.fields.iter() {
        let Some(value) = record.get(key) else {
            continue;
        };
        match desired_value(spec.kind, value) {
            Some(desired) => {
                remaining.push((template.pdf_field_name(key).to_string(), desired));
            }
            None => {
                if !is_blank(value) {
                    fields_skipped.push(SkippedField {
                        name: key.to_string(),
                        reason: "Boolean field expects true or false".to_string(),
                    });
                }
            }
        }
    }

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;

    let mut fields_filled = 0u32;
    let pages = document.pages();

    for page_index in 0..pages.len() {
        if remaining.is_empty() {
            break;
        }

        let page = pages.get(page_index).map_err(|e| Error::Pdfium {
            reason: format!("Failed to open page {}: {}", page_index + 1, e),
        })?;

        for mut annotation in page.annotations().iter() {
            if remaining.is_empty() {
                break;
            }

            let Some(field) = annotation.as_form_field_mut() else {
                continue;
            };
            let widget_name = field.name();

            let matching = remaining
                .iter()
                .position(|(name, _)| widget_name.as_deref() == Some(name.as_str()));
            let Some(idx) = matching else {
                continue;
            };
            let (name, desired) = remaining.remove(idx);

            match apply_value(field, &desired) {
                Ok(()) => fields_filled += 1,
                Err(reason) => fields_skipped.push(SkippedField { name, reason }),
            }
        }
    }

    // Anything left over had no widget in the document
    for (name, _) in remaining {
        fields_skipped.push(SkippedField {
            name,
            reason: "No matching form field in PDF".to_string(),
        });
    }

    let output_bytes = document.save_to_bytes().map_err(|e| Error::Pdfium {
        reason: format!("Failed to save filled PDF: {}", e),
    })?;

    Ok((
        output_bytes,
        FillOutcome {
            fields_filled,
            fields_skipped,
        },
    ))
}

/// Write one value into a widget, returning a skip reason on failure
fn apply_value(field: &mut PdfFormField, desired: &DesiredValue) -> std::result::Result<(), String> {
    if let Some(text_field) = field.as_text_field_mut() {
        match desired {
            DesiredValue::Text(value) => text_field
                .set_value(value)
                .map_err(|e| format!("Failed to set value: {}", e)),
            DesiredValue::Checked(_) => {
                Err("Boolean value targets a text field".to_string())
            }
        }
    } else if let Some(checkbox) = field.as_checkbox_field_mut() {
        match desired {
            DesiredValue::Checked(checked) => checkbox
                .set_checked(*checked)
                .map_err(|e| format!("Failed to set checked: {}", e)),
            DesiredValue::Text(_) => Err("Text value targets a checkbox field".to_string()),
        }
    } else if let Some(radio) = field.as_radio_button_field_mut() {
        match desired {
            DesiredValue::Checked(true) => radio
                .set_checked()
                .map_err(|e| format!("Failed to select radio: {}", e)),
            DesiredValue::Checked(false) => {
                Err("Radio buttons can only be selected, not cleared".to_string())
            }
            DesiredValue::Text(_) => Err("Text value targets a radio button".to_string()),
        }
    } else {
        Err("Unsupported field type for writing".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MappingRules;
    use serde_json::json;

    fn widget(name: &str, field_type: &str) -> FormFieldInfo {
        FormFieldInfo {
            page: 1,
            name: Some(name.to_string()),
            field_type: field_type.to_string(),
            value: None,
            is_checked: None,
            is_read_only: false,
            is_required: false,
            options: None,
        }
    }

    #[test]
    fn test_mapping_coverage() {
        let rules = MappingRules::default_rules();
        let medical = rules.get("medical_form").unwrap();

        let widgets = vec![
            widget("patient_name", "text"),
            widget("patient_id", "text"),
            widget("emergency_contact", "checkbox"),
            widget("clinic_stamp", "text"),
        ];

        let coverage = mapping_coverage(medical, &widgets);

        let mapped: Vec<&str> = coverage.mapped.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(mapped, vec!["patient_name", "patient_id", "emergency_contact"]);

        assert!(coverage.missing.iter().any(|m| m.key == "date_of_birth"));
        assert_eq!(coverage.unmapped_pdf_fields, vec!["clinic_stamp"]);
    }

    #[test]
    fn test_mapping_coverage_honors_pdf_field_override() {
        let json = r#"{
            "templates": {
                "t": {
                    "title": "T",
                    "fields": {
                        "patient_name": {"type": "text", "label": "Name", "pdf_field": "Name_Field_1"}
                    }
                }
            }
        }"#;
        let rules = MappingRules::from_slice(json.as_bytes()).unwrap();
        let template = rules.get("t").unwrap();

        let coverage = mapping_coverage(template, &[widget("Name_Field_1", "text")]);
        assert_eq!(coverage.mapped.len(), 1);
        assert_eq!(coverage.mapped[0].pdf_field, "Name_Field_1");
        assert!(coverage.unmapped_pdf_fields.is_empty());
    }

    #[test]
    fn test_desired_value_kinds() {
        assert!(matches!(
            desired_value(FieldKind::Boolean, &json!(true)),
            Some(DesiredValue::Checked(true))
        ));
        assert!(matches!(
            desired_value(FieldKind::Text, &json!("hello")),
            Some(DesiredValue::Text(_))
        ));
        assert!(matches!(
            desired_value(FieldKind::Number, &json!(42)),
            Some(DesiredValue::Text(_))
        ));
        assert!(desired_value(FieldKind::Text, &json!("")).is_none());
        assert!(desired_value(FieldKind::Boolean, &json!("yes")).is_none());
    }

    #[test]
    fn test_fill_rejects_non_pdf() {
        let rules = MappingRules::default_rules();
        let medical = rules.get("medical_form").unwrap();
        let record = json!({"patient_name": "A"});
        let result = fill_acroform(
            b"not a pdf",
            None,
            medical,
            record.as_object().unwrap(),
        );
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }
}
