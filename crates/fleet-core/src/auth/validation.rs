//! Input validation for login flow steps

use crate::error::{FleetError, FleetResult};

/// Length of the login code sent by the platform
pub const LOGIN_CODE_LENGTH: usize = 5;

/// Session names are non-empty ASCII letters, digits and underscores
pub fn validate_session_name(input: &str) -> FleetResult<&str> {
    let name = input.trim();
    let invalid = |reason: &str| FleetError::InvalidSessionName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits and underscore are allowed"));
    }
    Ok(name)
}

/// Phone numbers are `+` followed by at least one digit
pub fn validate_phone_number(input: &str) -> FleetResult<&str> {
    let phone = input.trim();
    let digits = phone.strip_prefix('+').unwrap_or_default();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(FleetError::InvalidPhoneNumber {
            input: phone.to_string(),
        });
    }
    Ok(phone)
}

/// Login codes are exactly [`LOGIN_CODE_LENGTH`] digits
pub fn validate_login_code(input: &str) -> FleetResult<&str> {
    let code = input.trim();
    if code.len() != LOGIN_CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(FleetError::InvalidLoginCode {
            reason: format!("expected {} digits", LOGIN_CODE_LENGTH),
        });
    }
    Ok(code)
}
