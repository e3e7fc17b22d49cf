use crate::error::ValidationError;

/// Shape check only: a non-empty local part, one `@`, and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.trim().is_empty() {
        Err(ValidationError::EmptyPassword)
    } else {
        Ok(())
    }
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), ValidationError> {
    validate_email(email)?;
    validate_password(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@mail.example.co.uk"));
        assert!(is_valid_email("  padded@example.org  "));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for email in [
            "",
            "user",
            "user@@bad",
            "@example.com",
            "user@example",
            "user@.com",
            "user@example.",
            "us er@example.com",
            "user@exa..mple.com",
        ] {
            assert!(!is_valid_email(email), "{email:?} should be rejected");
        }
    }

    #[test]
    fn email_is_checked_before_password() {
        assert_eq!(
            validate_credentials("nope", ""),
            Err(ValidationError::InvalidEmail)
        );
        assert_eq!(
            validate_credentials("a@b.io", "   "),
            Err(ValidationError::EmptyPassword)
        );
        assert_eq!(validate_credentials("a@b.io", "pw"), Ok(()));
    }
}
