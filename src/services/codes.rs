//! Join-code generation and normalization.

use rand::Rng;

use crate::error::ServiceError;

/// Length of a room join code.
pub const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw a random 6-character code from `A-Z0-9`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Uppercase and validate a user-supplied code.
///
/// ```ignore
/// normalize_code(" ab12cd ") // Ok("AB12CD")
/// normalize_code("AB12C")    // Err - too short
/// normalize_code("AB-12C")   // Err - not alphanumeric
/// ```
pub fn normalize_code(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.chars().count() != CODE_LENGTH {
        return Err(ServiceError::Validation(format!(
            "room code must be exactly {CODE_LENGTH} characters (got {})",
            code.chars().count()
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServiceError::Validation(
            "room code must contain only letters and digits".into(),
        ));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_uppercase_alphanumerics() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_code(" ab12cd ").unwrap(), "AB12CD");
        assert_eq!(normalize_code("AB12CD").unwrap(), "AB12CD");
    }

    #[test]
    fn normalize_rejects_malformed_codes() {
        assert!(normalize_code("AB12C").is_err());
        assert!(normalize_code("AB12CDE").is_err());
        assert!(normalize_code("AB-12C").is_err());
        assert!(normalize_code("").is_err());
    }
}
