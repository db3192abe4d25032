/// Lightweight quality check run over a synthesized commit message before it
/// is accepted in phase 1 of the commit pipeline.
pub struct CommitValidator;

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
    pub severity: WarningSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}

impl CommitValidator {
    pub fn validate(commit_message: &str) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if Self::has_conversational_pattern(commit_message) {
            warnings.push(ValidationWarning {
                message: "commit message contains conversational AI patterns".to_string(),
                severity: WarningSeverity::Error,
            });
        }

        let first_line = commit_message.lines().next().unwrap_or("");
        if first_line.len() > 72 {
            warnings.push(ValidationWarning {
                message: format!(
                    "subject line is {} characters (recommended: 50, max: 72)",
                    first_line.len()
                ),
                severity: WarningSeverity::Warning,
            });
        }

        if commit_message.contains('|') && commit_message.lines().count() > 3 {
            warnings.push(ValidationWarning {
                message: "commit message contains markdown tables or excessive formatting"
                    .to_string(),
                severity: WarningSeverity::Info,
            });
        }

        warnings
    }

    fn has_conversational_pattern(msg: &str) -> bool {
        let conversational_patterns = [
            "Perfect!", "Good, I", "Good,", "Let me", "I'll", "I will", "I can see", "Sure,",
            "Okay,", "Great!",
        ];

        let first_line = msg.lines().next().unwrap_or("");
        conversational_patterns
            .iter()
            .any(|pattern| first_line.starts_with(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_good_message() {
        let msg = "feat: add user authentication";
        let warnings = CommitValidator::validate(msg);
        assert!(warnings.iter().all(|w| w.severity != WarningSeverity::Error));
    }

    #[test]
    fn validate_conversational_message() {
        let msg = "Perfect! Let me create a summary for you:";
        let warnings = CommitValidator::validate(msg);
        assert!(warnings.iter().any(|w| w.severity == WarningSeverity::Error));
    }

    #[test]
    fn validate_long_subject() {
        let msg = "a".repeat(100);
        let warnings = CommitValidator::validate(&msg);
        assert!(warnings
            .iter()
            .any(|w| w.severity == WarningSeverity::Warning && w.message.contains("characters")));
    }
}
