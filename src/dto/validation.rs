//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::match_record::AnswerLetter;

/// Longest join code accepted before trimming.
const MAX_CODE_LENGTH: usize = 64;

/// Validates that an answer is a single option letter (`a`..`z`, any case).
pub fn validate_answer_letter(letter: &str) -> Result<(), ValidationError> {
    letter.parse::<AnswerLetter>().map(|_| ()).map_err(|err| {
        let mut error = ValidationError::new("answer_letter");
        error.message = Some(err.to_string().into());
        error
    })
}

/// Validates a user-entered join code: non-blank once trimmed, alphanumeric.
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    let trimmed = code.trim();
    if trimmed.is_empty() || code.len() > MAX_CODE_LENGTH {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(format!("Join code must be 1 to {MAX_CODE_LENGTH} characters").into());
        return Err(err);
    }

    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must contain only letters, digits and dashes".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_answer_letter() {
        assert!(validate_answer_letter("a").is_ok());
        assert!(validate_answer_letter("D").is_ok());
        assert!(validate_answer_letter("ab").is_err());
        assert!(validate_answer_letter("").is_err());
        assert!(validate_answer_letter("7").is_err());
    }

    #[test]
    fn test_validate_join_code() {
        assert!(validate_join_code("3f2a9c0d1e").is_ok());
        assert!(validate_join_code("  3f2a9c0d1e \n").is_ok()); // trimmed later
        assert!(validate_join_code("   ").is_err());
        assert!(validate_join_code("drop table;").is_err());
    }
}
