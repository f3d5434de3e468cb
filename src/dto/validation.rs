//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::services::codes::CODE_LENGTH;

/// Validates that a join code is six ASCII letters or digits. Case is ignored and
/// surrounding whitespace is tolerated; normalization happens in the directory.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("AB12CD")   // Ok
/// validate_room_code(" ab12cd ") // Ok - normalized later
/// validate_room_code("AB12C")    // Err - too short
/// validate_room_code("AB-12C")   // Err - punctuation
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    let length = code.chars().count();
    if length != CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!("Room code must be exactly {CODE_LENGTH} characters (got {length})").into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}
