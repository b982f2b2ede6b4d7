use crate::error::AppError;

/// Strips markup from user-supplied text.
pub fn clean(input: &str) -> String {
    ammonia::clean(input).trim().to_string()
}

/// Checks the character count of `value` against `min..=max`.
pub fn length(field: &str, value: &str, min: usize, max: Option<usize>) -> Result<(), AppError> {
    let len = value.chars().count();
    if len < min {
        return Err(AppError::validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    if let Some(max) = max {
        if len > max {
            return Err(AppError::validation(format!(
                "{field} must be at most {max} characters"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_removed() {
        assert_eq!(clean("  hi <script>alert(1)</script> "), "hi");
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(length("title", "abcde", 5, Some(5)).is_ok());
        assert!(length("title", "abcd", 5, Some(200)).is_err());
        assert!(length("title", "abcdef", 5, Some(5)).is_err());
        assert!(length("body", &"x".repeat(500), 10, None).is_ok());
    }
}
