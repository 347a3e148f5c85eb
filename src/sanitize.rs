//! Post-processing for generated text.
//!
//! Models occasionally echo chat-template tokens or fragments of the prompt
//! instructions. [`Sanitizer`] removes them with an ordered list of regex
//! rules. Rules are applied in sequence, each on the output of the previous
//! one, so order matters.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub replacement: &'static str,
}

impl Rule {
    fn new(pattern: &str, replacement: &'static str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self {
                pattern,
                replacement,
            }),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "dropping invalid sanitizer rule");
                None
            }
        }
    }
}

const DEFAULT_RULES: &[(&str, &str)] = &[
    // Chat-template tokens.
    (r"(?i)\[/?(?:B_)?INST\]|\[/?s\]|</?s>", ""),
    // Instruction phrases leaked from the prompts.
    (r"(?is)Do NOT quote verses verbatim[^.]*\.", ""),
    (r"(?is)Instead, explain what they teach[^.]*\.", ""),
    (r"(?is)Use the verse meanings provided above[^.]*\.", ""),
    (r"(?is)Format:.*?which addresses this by\.\.\.", ""),
    (r"(?is)Format:.*?which refines your point by\.\.\.", ""),
    (r"(?is)Format:.*?which challenges this understanding by\.\.\.", ""),
    (r"(?is)As.*?, open the debate by.*?\.", ""),
    (r"(?is)As.*?, acknowledge what.*?\.", ""),
    (r"(?is)Do NOT quote.*?Instead", ""),
    // Empty brackets only; "[Gita 2.47]" survives.
    (r"\[\s*\]", ""),
    (r"(?i)\.\s*(Do NOT|Instead)[^.]*\.", "."),
    (r"\s+", " "),
    (r"\.{2,}", "."),
];

static DEFAULT_SANITIZER: LazyLock<Sanitizer> = LazyLock::new(|| Sanitizer {
    rules: DEFAULT_RULES
        .iter()
        .filter_map(|(pattern, replacement)| Rule::new(pattern, replacement))
        .collect(),
});

/// Ordered regex rewrite rules, followed by a final trim.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<Rule>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        DEFAULT_SANITIZER.clone()
    }
}

impl Sanitizer {
    /// A sanitizer with no rules; only trims.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule that runs after all existing ones.
    pub fn with_rule(mut self, pattern: Regex, replacement: &'static str) -> Self {
        self.rules.push(Rule {
            pattern,
            replacement,
        });
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            if let std::borrow::Cow::Owned(replaced) =
                rule.pattern.replace_all(&out, rule.replacement)
            {
                out = replaced;
            }
        }
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(text: &str) -> String {
        Sanitizer::default().apply(text)
    }

    #[test]
    fn all_default_rules_compile() {
        assert_eq!(Sanitizer::default().rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn strips_chat_template_tokens() {
        assert_eq!(
            clean("[INST] Peace [/INST] comes <s>from</s> within [/s]"),
            "Peace comes from within"
        );
        assert_eq!(clean("[b_inst]Hello[/B_INST]"), "Hello");
    }

    #[test]
    fn strips_leaked_instructions() {
        let raw = "Do NOT quote verses verbatim from the text. My dear student, \
                   act without attachment.";
        assert_eq!(clean(raw), "My dear student, act without attachment.");

        let raw = "Use the verse meanings provided above to guide you. Be still.";
        assert_eq!(clean(raw), "Be still.");
    }

    #[test]
    fn strips_format_echo() {
        let raw = "Format: Krishna spoke, which refines your point by... Love one another.";
        assert_eq!(clean(raw), "Love one another.");
    }

    #[test]
    fn keeps_verse_brackets_but_drops_empty_ones() {
        assert_eq!(
            clean("As taught in [Gita 2.47] [ ] act well."),
            "As taught in [Gita 2.47] act well."
        );
    }

    #[test]
    fn collapses_whitespace_and_dots() {
        assert_eq!(clean("Be   still...\n\n and know."), "Be still. and know.");
    }

    #[test]
    fn custom_rule_runs_last() {
        let sanitizer = Sanitizer::empty()
            .with_rule(Regex::new("dear one").unwrap(), "friend");
        assert_eq!(sanitizer.apply("  Hello, dear one. "), "Hello, friend.");
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = "Hatred is never appeased by hatred in this world.";
        assert_eq!(clean(text), text);
    }
}
