//! PDF layer: report generation, AcroForm handling, and output assembly
//!
//! Built on PDFium for document creation and form filling, and on qpdf for
//! merging and protecting assembled outputs.

pub mod form;
pub mod qpdf;
pub mod writer;

pub use form::{
    fill_acroform, inspect_form_fields, mapping_coverage, FieldMapping, FillOutcome,
    FormFieldInfo, FormFieldOption, MappingCoverage, SkippedField,
};
pub use qpdf::PdfAssembler;
pub use writer::{render_report, ReportContext};

use crate::error::{Error, Result};
use pdfium_render::prelude::*;

/// Bind a fresh PDFium instance.
///
/// PDFium is not thread-safe, so every operation builds its own instance
/// inside `spawn_blocking`. The library is looked up next to the binary,
/// then under the conventional install prefix, then on the system loader
/// path.
pub(crate) fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Refuse inputs that do not start with the PDF magic header
pub(crate) fn ensure_pdf_header(data: &[u8]) -> Result<()> {
    if !data.starts_with(b"%PDF") {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

/// Load a document from bytes, mapping password failures
pub(crate) fn load_document<'a>(
    pdfium: &'a Pdfium,
    data: &'a [u8],
    password: Option<&str>,
) -> Result<PdfDocument<'a>> {
    pdfium
        .load_pdf_from_byte_slice(data, password)
        .map_err(|e| map_load_error(e, password.is_some()))
}

/// Map a PDFium load failure, telling a missing password apart from a
/// wrong one
pub(crate) fn map_load_error(e: PdfiumError, had_password: bool) -> Error {
    match e {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if had_password {
                Error::IncorrectPassword
            } else {
                Error::PasswordRequired
            }
        }
        _ => Error::Pdfium {
            reason: format!("{}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_header_check() {
        assert!(ensure_pdf_header(b"%PDF-1.7 ...").is_ok());
        assert!(ensure_pdf_header(b"not a pdf").is_err());
        assert!(ensure_pdf_header(b"%PD").is_err());
        assert!(ensure_pdf_header(b"").is_err());
    }
}
