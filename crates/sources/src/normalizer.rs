use regex::Regex;

/// Cleans text pulled out of rendered HTML.
pub struct TextNormalizer {
    spaces: Regex,
    blank_lines: Regex,
}

impl TextNormalizer {
    pub fn new() -> Self {
        Self {
            spaces: Regex::new(r"[ \t\u{a0}]+").expect("static regex"),
            blank_lines: Regex::new(r"\n{2,}").expect("static regex"),
        }
    }

    /// Single-line value: all whitespace runs become one space.
    pub fn inline(&self, text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Multi-line value: keep line breaks, collapse runs of spaces and
    /// blank lines, trim each line.
    pub fn block(&self, text: &str) -> String {
        let collapsed = self.spaces.replace_all(text, " ");
        let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
        let joined = lines.join("\n");
        self.blank_lines.replace_all(joined.trim(), "\n").to_string()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.inline("  Senior\n  Software   Engineer "), "Senior Software Engineer");
        assert_eq!(normalizer.inline("   "), "");
    }

    #[test]
    fn test_block_keeps_lines() {
        let normalizer = TextNormalizer::new();
        let text = "  About us \n\n\n  We build   things.\u{a0}\u{a0}Fast.\n";
        assert_eq!(normalizer.block(text), "About us\nWe build things. Fast.");
    }
}
