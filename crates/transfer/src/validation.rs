use std::path::{Component, Path};

use crate::TransferError;
use crate::chunked::is_sha256_hex;
use crate::types::PackageMeta;

/// Upper bound on any single metadata field.
const MAX_COMPONENT_LEN: usize = 128;

/// Validates a metadata value that becomes part of a package file name.
///
/// Rejects:
/// - Empty values
/// - Path separators, `.` and `..`
/// - Windows prefix components (`C:`)
/// - Control characters
pub fn validate_name_component(field: &str, value: &str) -> Result<(), TransferError> {
    if value.is_empty() {
        return Err(TransferError::BadRequest(format!("{field} must not be empty")));
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(TransferError::BadRequest(format!(
            "{field} longer than {MAX_COMPONENT_LEN} bytes"
        )));
    }
    if value.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(TransferError::BadRequest(format!(
            "{field} contains a path separator or control character: {value:?}"
        )));
    }

    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::BadRequest(format!(
            "{field} is not a plain name: {value:?}"
        ))),
    }
}

/// Validates the metadata declared at `Start`.
pub fn validate_meta(meta: &PackageMeta) -> Result<(), TransferError> {
    validate_name_component("name", &meta.name)?;
    validate_name_component("version", &meta.version)?;
    validate_name_component("vendor", &meta.vendor)?;
    if let Some(checksum) = &meta.checksum {
        if !is_sha256_hex(checksum) {
            return Err(TransferError::BadRequest(
                "checksum must be a hex-encoded SHA-256 digest".into(),
            ));
        }
    }
    Ok(())
}
