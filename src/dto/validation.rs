//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::error::ServiceError;

/// Number of letters in a room code.
pub const ROOM_CODE_LEN: usize = 4;

/// Validates that a room code is exactly four uppercase ASCII letters.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("ABCD") // Ok
/// validate_room_code("abcd") // Err - lowercase
/// validate_room_code("ABC1") // Err - digit
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_uppercase()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only uppercase letters".into());
        return Err(err);
    }

    Ok(())
}

/// Normalize a room code typed by a user (surrounding whitespace, lowercase) and validate it.
pub fn parse_room_code(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    validate_room_code(&code).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| "invalid room code".into()),
        )
    })?;
    Ok(code)
}

/// Reject blank identifiers before they reach the store.
pub fn require_non_empty(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_code_valid() {
        assert!(validate_room_code("ABCD").is_ok());
        assert!(validate_room_code("ZZZZ").is_ok());
    }

    #[test]
    fn test_validate_room_code_invalid_length() {
        assert!(validate_room_code("ABC").is_err());
        assert!(validate_room_code("ABCDE").is_err());
        assert!(validate_room_code("").is_err());
    }

    #[test]
    fn test_validate_room_code_invalid_format() {
        assert!(validate_room_code("abcd").is_err());
        assert!(validate_room_code("AB1D").is_err());
        assert!(validate_room_code("AB D").is_err());
        assert!(validate_room_code("ÄBCD").is_err());
    }

    #[test]
    fn test_parse_room_code_normalizes() {
        assert_eq!(parse_room_code(" abcd ").unwrap(), "ABCD");
        assert!(matches!(
            parse_room_code("ab"),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
