use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommitMessageError {
    #[error("commit message synthesis failed: {0}")]
    SynthesisFailed(String),
}

/// Builds the commit message used by phase 1 of the commit pipeline.
pub struct CommitMessageGenerator;

impl CommitMessageGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Priority order: an agent-synthesized message (from the auxiliary
    /// commit-message container), else a fallback built from the task prompt.
    pub fn generate(&self, task_prompt: &str, synthesized: Option<&str>, fallback_prefix: &str) -> String {
        if let Some(msg) = synthesized {
            if Self::is_valid_commit_message(msg) {
                return msg.trim().to_string();
            }
        }
        Self::fallback(task_prompt, fallback_prefix)
    }

    fn fallback(task_prompt: &str, prefix: &str) -> String {
        format!("{prefix}: {}", Self::sanitize_title(task_prompt))
    }

    /// Strip conversational AI prefixes, take the first line, and truncate to
    /// 72 chars (counted, not byte-sliced, so multi-byte chars never panic).
    fn sanitize_title(raw_title: &str) -> String {
        let conversational_prefixes = [
            "Perfect! Let me ",
            "Perfect! ",
            "Good, I can see ",
            "Good, I ",
            "Good, ",
            "Let me ",
            "I'll ",
            "I will ",
            "I can ",
            "Sure, I'll ",
            "Sure, ",
            "Okay, I'll ",
            "Okay, ",
            "Great! I'll ",
            "Great! ",
        ];

        let mut cleaned = raw_title.trim();
        for prefix in &conversational_prefixes {
            if let Some(stripped) = cleaned.strip_prefix(prefix) {
                cleaned = stripped;
                break;
            }
        }

        cleaned = cleaned.lines().next().unwrap_or(cleaned);
        let cleaned: String = cleaned.chars().take(72).collect();
        let cleaned = cleaned.trim_end_matches('…').trim_end_matches("...");
        cleaned.trim().to_string()
    }

    fn is_valid_commit_message(msg: &str) -> bool {
        if msg.is_empty() {
            return false;
        }

        let conversational_patterns = [
            "Perfect!", "Good, I", "Let me", "I'll", "I will", "I can see", "Sure,", "Okay,",
        ];

        let first_line = msg.lines().next().unwrap_or("");
        if conversational_patterns
            .iter()
            .any(|pattern| first_line.starts_with(pattern))
        {
            return false;
        }

        first_line.len() > 5 && first_line.len() < 200
    }
}

impl Default for CommitMessageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_title_removes_conversational_prefixes() {
        assert_eq!(
            CommitMessageGenerator::sanitize_title("Perfect! Let me create a summary for you:"),
            "create a summary for you:"
        );
        assert_eq!(
            CommitMessageGenerator::sanitize_title("Let me implement the feature"),
            "implement the feature"
        );
    }

    #[test]
    fn sanitize_title_takes_first_line() {
        assert_eq!(
            CommitMessageGenerator::sanitize_title("First line\nSecond line\nThird line"),
            "First line"
        );
    }

    #[test]
    fn sanitize_title_truncates_by_char_count_not_bytes() {
        let long_title = "a".repeat(100);
        let result = CommitMessageGenerator::sanitize_title(&long_title);
        assert_eq!(result.chars().count(), 72);
    }

    #[test]
    fn sanitize_title_handles_emoji_truncation() {
        let title_with_emoji = format!("{}🚀🎉✨", "a".repeat(70));
        let result = CommitMessageGenerator::sanitize_title(&title_with_emoji);
        assert_eq!(result.chars().count(), 72);
        assert!(result.ends_with("🚀🎉"));
    }

    #[test]
    fn sanitize_title_handles_cjk_characters() {
        let cjk_title = "这是一个很长的中文标题需要被截断到七十二个字符以内测试多字节字符处理";
        let result = CommitMessageGenerator::sanitize_title(cjk_title);
        assert!(result.chars().count() <= 72);
    }

    #[test]
    fn generate_prefers_synthesized_message() {
        let gen = CommitMessageGenerator::new();
        let msg = gen.generate("add login", Some("feat: add OAuth login"), "task");
        assert_eq!(msg, "feat: add OAuth login");
    }

    #[test]
    fn generate_falls_back_when_synthesis_rejected() {
        let gen = CommitMessageGenerator::new();
        let msg = gen.generate("Let me add the login flow", Some("Perfect! done"), "task");
        assert_eq!(msg, "task: add the login flow");
    }

    #[test]
    fn generate_falls_back_when_no_synthesis() {
        let gen = CommitMessageGenerator::new();
        let msg = gen.generate("fix the bug", None, "task");
        assert_eq!(msg, "task: fix the bug");
    }
}
