use crate::error::ProtocolError;

/// Maximum utterance length, in characters
const MAX_UTTERANCE_CHARS: usize = 2000;
/// Maximum role name length, in characters
const MAX_ROLE_CHARS: usize = 64;

/// Validate a user utterance before it reaches the generation backend.
pub fn validate_utterance(text: &str) -> Result<(), ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::InvalidUtterance(
            "Utterance cannot be empty".to_string(),
        ));
    }
    let chars = text.chars().count();
    if chars > MAX_UTTERANCE_CHARS {
        return Err(ProtocolError::InvalidUtterance(format!(
            "Utterance too long ({chars} characters, max {MAX_UTTERANCE_CHARS})"
        )));
    }
    Ok(())
}

/// Validate a persona name from a role-switch message.
pub fn validate_role(role: &str) -> Result<(), ProtocolError> {
    if role.trim().is_empty() {
        return Err(ProtocolError::InvalidRole("Role cannot be empty".to_string()));
    }
    if role.chars().count() > MAX_ROLE_CHARS {
        return Err(ProtocolError::InvalidRole(format!(
            "Role too long (max {MAX_ROLE_CHARS} characters)"
        )));
    }
    if role.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidRole(
            "Role contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utterance_valid() {
        assert!(validate_utterance("Hello").is_ok());
        assert!(validate_utterance("今天天气怎么样？").is_ok());
    }

    #[test]
    fn test_validate_utterance_empty() {
        let result = validate_utterance("   ");
        assert!(matches!(result, Err(ProtocolError::InvalidUtterance(msg)) if msg.contains("empty")));
    }

    #[test]
    fn test_validate_utterance_counts_characters() {
        // 2000 CJK characters are 6000 bytes but still within the limit
        assert!(validate_utterance(&"好".repeat(2000)).is_ok());

        let result = validate_utterance(&"a".repeat(2001));
        assert!(matches!(result, Err(ProtocolError::InvalidUtterance(msg)) if msg.contains("too long")));
    }

    #[test]
    fn test_validate_role() {
        assert!(validate_role("知心大姐姐").is_ok());
        assert!(validate_role("code").is_ok());
        assert!(validate_role("").is_err());
        assert!(validate_role(&"r".repeat(65)).is_err());
        assert!(validate_role("co\nde").is_err());
    }
}
