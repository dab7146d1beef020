//! Output assembly via qpdf FFI
//!
//! Batch runs can be concatenated into a single PDF, and any output can be
//! password protected before it leaves the server.

use crate::error::{Error, Result};
use qpdf::{EncryptionParams, EncryptionParamsR6, PrintPermission, QPdf};

pub struct PdfAssembler;

fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl PdfAssembler {
    /// Concatenate generated documents into one PDF, in input order
    pub fn merge(inputs: &[&[u8]]) -> Result<Vec<u8>> {
        if inputs.is_empty() {
            return Err(Error::QpdfError {
                reason: "No input PDFs provided".to_string(),
            });
        }

        let merged = QPdf::empty();
        for (ordinal, bytes) in inputs.iter().enumerate() {
            Self::append_pages(&merged, bytes, ordinal)?;
        }

        merged.writer().write_to_memory().map_err(map_qpdf_error)
    }

    fn append_pages(dest: &QPdf, bytes: &[u8], ordinal: usize) -> Result<()> {
        let source = QPdf::read_from_memory(bytes).map_err(|e| Error::QpdfError {
            reason: format!("Failed to read input PDF {}: {}", ordinal, e),
        })?;
        let pages = source.get_pages().map_err(|e| Error::QpdfError {
            reason: format!("Failed to get pages from input PDF {}: {}", ordinal, e),
        })?;

        for page in &pages {
            let adopted = dest.copy_from_foreign(page);
            dest.add_page(&adopted, false).map_err(map_qpdf_error)?;
        }

        Ok(())
    }

    /// Password protect an output with R6 (AES-256) encryption.
    ///
    /// The owner password falls back to the user password. Protected
    /// reports stay readable and printable but cannot be modified.
    pub fn protect(
        input: &[u8],
        user_password: &str,
        owner_password: Option<&str>,
    ) -> Result<Vec<u8>> {
        let document = QPdf::read_from_memory(input).map_err(map_qpdf_error)?;

        let encryption = EncryptionParams::R6(EncryptionParamsR6 {
            user_password: user_password.to_string(),
            owner_password: owner_password.unwrap_or(user_password).to_string(),
            allow_accessibility: true,
            allow_extract: true,
            allow_assemble: false,
            allow_annotate_and_form: false,
            allow_form_filling: false,
            allow_modify_other: false,
            allow_print: PrintPermission::Full,
            encrypt_metadata: true,
        });

        let mut writer = document.writer();
        writer
            .preserve_encryption(false)
            .encryption_params(encryption);
        writer.write_to_memory().map_err(map_qpdf_error)
    }

    /// Page count of a generated document
    pub fn page_count(input: &[u8]) -> Result<u32> {
        let document = QPdf::read_from_memory(input).map_err(map_qpdf_error)?;
        document.get_num_pages().map_err(map_qpdf_error)
    }
}
