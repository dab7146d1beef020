//! Report document generation
//!
//! Renders a record into a standalone PDF report: a centered title block,
//! document info lines, a Field/Value/Status table, and a confidentiality
//! footer. The layout is a fixed single-column form on US Letter pages with
//! built-in Helvetica fonts, so output is deterministic and needs no font
//! embedding.

use crate::dataset::Record;
use crate::error::{Error, Result};
use crate::pdf::create_pdfium;
use crate::template::validate::{is_blank, value_as_string};
use crate::template::{FieldKind, Template};
use chrono::NaiveDate;
use pdfium_render::prelude::*;

// US Letter in points
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;

const MARGIN: f32 = 50.0;
const LABEL_X: f32 = 70.0;
const VALUE_X: f32 = 250.0;
const STATUS_X: f32 = 450.0;
const TABLE_RIGHT: f32 = 520.0;
const ROW_STEP: f32 = 20.0;

// Rows stop here; the footer block sits below
const PAGE_BREAK_Y: f32 = 150.0;
const CONTINUATION_TOP: f32 = PAGE_HEIGHT - 80.0;
const FOOTER_Y: f32 = 80.0;

const MAX_VALUE_CHARS: usize = 35;

/// Run metadata stamped into each generated report
#[derive(Debug, Clone)]
pub struct ReportContext {
    /// Mapping rules version
    pub version: String,
    /// One-based position of the record within the batch
    pub record_number: usize,
    /// Total records in the batch
    pub record_count: usize,
}

struct Row {
    label: String,
    value: String,
    required: bool,
}

/// Format a value for display in a report.
///
/// Booleans render as Yes/No and ISO dates are re-rendered in long form;
/// everything else uses the plain string form.
pub fn format_display_value(kind: FieldKind, value: &serde_json::Value) -> String {
    match kind {
        FieldKind::Boolean => match value {
            serde_json::Value::Bool(true) => "Yes".to_string(),
            serde_json::Value::Bool(false) => "No".to_string(),
            other => value_as_string(other),
        },
        FieldKind::Date => {
            let text = value_as_string(value);
            match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                Ok(date) => date.format("%B %d, %Y").to_string(),
                Err(_) => text,
            }
        }
        _ => value_as_string(value),
    }
}

/// Truncate a display value to `max` characters, appending an ellipsis
pub fn truncate_display(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Rough Helvetica width estimate, used only for centering.
/// Average glyph advance is close to half the font size.
fn approx_text_width(text: &str, size: f32, bold: bool) -> f32 {
    let factor = if bold { 0.56 } else { 0.50 };
    text.chars().count() as f32 * size * factor
}

fn build_rows(template: &Template, record: &Record) -> Vec<Row> {
    let mut rows = Vec::new();
    for (key, spec) in template.fields.iter() {
        let Some(value) = record.get(key) else {
            continue;
        };
        if is_blank(value) {
            continue;
        }
        let display = format_display_value(spec.kind, value);
        rows.push(Row {
            label: spec.label.clone(),
            value: truncate_display(&display, MAX_VALUE_CHARS),
            required: spec.required,
        });
    }
    rows
}

fn rows_that_fit(start_y: f32) -> usize {
    if start_y < PAGE_BREAK_Y {
        return 0;
    }
    ((start_y - PAGE_BREAK_Y) / ROW_STEP) as usize + 1
}

fn pdfium_err(context: &str) -> impl Fn(PdfiumError) -> Error + '_ {
    move |e| Error::Pdfium {
        reason: format!("{}: {}", context, e),
    }
}

fn draw_text(
    page: &mut PdfPage,
    x: f32,
    y: f32,
    text: &str,
    font: PdfFontToken,
    size: f32,
) -> Result<()> {
    page.objects_mut()
        .create_text_object(
            PdfPoints::new(x),
            PdfPoints::new(y),
            text,
            font,
            PdfPoints::new(size),
        )
        .map_err(pdfium_err("Failed to place text"))?;
    Ok(())
}

fn draw_text_centered(
    page: &mut PdfPage,
    y: f32,
    text: &str,
    font: PdfFontToken,
    size: f32,
    bold: bool,
) -> Result<()> {
    let x = (PAGE_WIDTH - approx_text_width(text, size, bold)) / 2.0;
    draw_text(page, x.max(MARGIN), y, text, font, size)
}

fn draw_line(page: &mut PdfPage, x1: f32, y1: f32, x2: f32, y2: f32, color: PdfColor) -> Result<()> {
    page.objects_mut()
        .create_path_object_line(
            PdfPoints::new(x1),
            PdfPoints::new(y1),
            PdfPoints::new(x2),
            PdfPoints::new(y2),
            color,
            PdfPoints::new(0.75),
        )
        .map_err(pdfium_err("Failed to draw rule"))?;
    Ok(())
}

/// Render one record into a single-document PDF report
pub fn render_report(
    template: &Template,
    record: &Record,
    ctx: &ReportContext,
) -> Result<Vec<u8>> {
    let rows = build_rows(template, record);

    // Partition rows into pages up front so each page is drawn in one pass
    let first_start = PAGE_HEIGHT - 265.0;
    let first_fit = rows_that_fit(first_start);
    let cont_fit = rows_that_fit(CONTINUATION_TOP);

    let mut chunks: Vec<&[Row]> = Vec::new();
    if rows.len() <= first_fit {
        chunks.push(&rows[..]);
    } else {
        chunks.push(&rows[..first_fit]);
        let mut rest = &rows[first_fit..];
        while !rest.is_empty() {
            let take = rest.len().min(cont_fit.max(1));
            chunks.push(&rest[..take]);
            rest = &rest[take..];
        }
    }

    let pdfium = create_pdfium()?;
    let mut document = pdfium
        .create_new_pdf()
        .map_err(pdfium_err("Failed to create document"))?;

    let helv = document.fonts_mut().helvetica();
    let helv_bold = document.fonts_mut().helvetica_bold();

    let black = PdfColor::new(0, 0, 0, 255);
    let light = PdfColor::new(204, 204, 204, 255);
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let last_chunk = chunks.len() - 1;

    for (chunk_index, chunk) in chunks.iter().enumerate() {
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(
                PdfPoints::new(PAGE_WIDTH),
                PdfPoints::new(PAGE_HEIGHT),
            ))
            .map_err(pdfium_err("Failed to create page"))?;

        let mut y = if chunk_index == 0 {
            let title = format!("{} REPORT", template.title.to_uppercase());
            draw_text_centered(&mut page, PAGE_HEIGHT - 80.0, &title, helv_bold, 24.0, true)?;
            if !template.description.is_empty() {
                draw_text_centered(
                    &mut page,
                    PAGE_HEIGHT - 105.0,
                    &template.description,
                    helv,
                    12.0,
                    false,
                )?;
            }
            draw_line(
                &mut page,
                MARGIN,
                PAGE_HEIGHT - 120.0,
                PAGE_WIDTH - MARGIN,
                PAGE_HEIGHT - 120.0,
                black,
            )?;

            let info_y = PAGE_HEIGHT - 150.0;
            draw_text(
                &mut page,
                MARGIN,
                info_y,
                &format!("Generated: {}", timestamp),
                helv,
                10.0,
            )?;
            draw_text(
                &mut page,
                350.0,
                info_y,
                &format!("Rules Version: {}", ctx.version),
                helv,
                10.0,
            )?;
            draw_text(
                &mut page,
                MARGIN,
                info_y - 15.0,
                &format!("Document Type: {}", template.title),
                helv,
                10.0,
            )?;
            draw_text(
                &mut page,
                350.0,
                info_y - 15.0,
                &format!("Record: {} of {}", ctx.record_number, ctx.record_count),
                helv,
                10.0,
            )?;

            draw_text(&mut page, MARGIN, PAGE_HEIGHT - 200.0, "RECORD DETAILS", helv_bold, 16.0)?;

            let header_y = PAGE_HEIGHT - 240.0;
            draw_text(&mut page, LABEL_X, header_y, "Field", helv_bold, 11.0)?;
            draw_text(&mut page, VALUE_X, header_y, "Value", helv_bold, 11.0)?;
            draw_text(&mut page, STATUS_X, header_y, "Status", helv_bold, 11.0)?;
            draw_line(
                &mut page,
                LABEL_X,
                header_y - 5.0,
                TABLE_RIGHT,
                header_y - 5.0,
                black,
            )?;

            first_start
        } else {
            CONTINUATION_TOP
        };

        for row in *chunk {
            draw_text(&mut page, LABEL_X, y, &row.label, helv_bold, 10.0)?;
            draw_text(&mut page, VALUE_X, y, &row.value, helv, 10.0)?;
            let status = if row.required { "Required" } else { "Optional" };
            draw_text(&mut page, STATUS_X, y, status, helv, 9.0)?;
            draw_line(&mut page, LABEL_X, y - 3.0, TABLE_RIGHT, y - 3.0, light)?;
            y -= ROW_STEP;
        }

        if chunk_index == last_chunk {
            draw_text_centered(&mut page, FOOTER_Y, "CONFIDENTIAL DOCUMENT", helv, 8.0, false)?;
            if !template.compliance.is_empty() {
                let notice = format!(
                    "Contains information subject to {} requirements",
                    template.compliance.join("/")
                );
                draw_text_centered(&mut page, FOOTER_Y - 15.0, &notice, helv, 8.0, false)?;
            }
            let signature = format!("Generated by pdf-field-mapper | {}", timestamp);
            draw_text_centered(&mut page, FOOTER_Y - 30.0, &signature, helv, 6.0, false)?;
        }
    }

    document.save_to_bytes().map_err(pdfium_err("Failed to save document"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MappingRules;
    use serde_json::json;

    #[test]
    fn test_format_boolean() {
        assert_eq!(format_display_value(FieldKind::Boolean, &json!(true)), "Yes");
        assert_eq!(format_display_value(FieldKind::Boolean, &json!(false)), "No");
    }

    #[test]
    fn test_format_date_long_form() {
        assert_eq!(
            format_display_value(FieldKind::Date, &json!("1985-06-15")),
            "June 15, 1985"
        );
    }

    #[test]
    fn test_format_unparseable_date_passthrough() {
        assert_eq!(
            format_display_value(FieldKind::Date, &json!("soon")),
            "soon"
        );
    }

    #[test]
    fn test_format_text_passthrough() {
        assert_eq!(
            format_display_value(FieldKind::Text, &json!("hello")),
            "hello"
        );
        assert_eq!(format_display_value(FieldKind::Number, &json!(75000)), "75000");
    }

    #[test]
    fn test_truncate_display() {
        assert_eq!(truncate_display("short", 35), "short");
        let long = "x".repeat(40);
        let truncated = truncate_display(&long, 35);
        assert_eq!(truncated.chars().count(), 35);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_rows_that_fit() {
        assert_eq!(rows_that_fit(PAGE_BREAK_Y - 1.0), 0);
        assert_eq!(rows_that_fit(PAGE_BREAK_Y), 1);
        assert_eq!(rows_that_fit(PAGE_BREAK_Y + ROW_STEP), 2);
        // First page must hold a usable number of rows
        assert!(rows_that_fit(PAGE_HEIGHT - 265.0) >= 15);
    }

    #[test]
    fn test_build_rows_skips_blank_and_unknown() {
        let rules = MappingRules::default_rules();
        let medical = rules.get("medical_form").unwrap();
        let record = json!({
            "patient_name": "John Michael Smith",
            "phone": "",
            "not_in_template": "ignored",
            "emergency_contact": true
        });
        let rows = build_rows(medical, record.as_object().unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "Patient Full Name");
        assert_eq!(rows[1].value, "Yes");
    }

    #[test]
    fn test_build_rows_template_order() {
        let rules = MappingRules::default_rules();
        let medical = rules.get("medical_form").unwrap();
        // Record keys deliberately out of template order
        let record = json!({
            "date_of_birth": "1985-06-15",
            "patient_name": "John Michael Smith"
        });
        let rows = build_rows(medical, record.as_object().unwrap());
        assert_eq!(rows[0].label, "Patient Full Name");
        assert_eq!(rows[1].label, "Date of Birth");
        assert_eq!(rows[1].value, "June 15, 1985");
    }

    #[test]
    fn test_approx_width_monotonic() {
        assert!(approx_text_width("wide title", 24.0, true) > approx_text_width("x", 24.0, true));
        assert!(approx_text_width("same", 12.0, true) > approx_text_width("same", 12.0, false));
    }
}
