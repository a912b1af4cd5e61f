//! Field resolution over a rendered page snapshot.
//!
//! Each field is described by an ordered list of CSS selectors; the first
//! selector whose first match carries non-empty text wins. Exhausting the
//! list is a normal outcome that the caller turns into a fallback value.

use browser::Located;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::normalizer::TextNormalizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextJoin {
    /// Text nodes joined by spaces, whitespace collapsed.
    Inline,
    /// Text nodes joined by newlines.
    Lines,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub selectors: &'static [&'static str],
    pub join: TextJoin,
}

impl FieldRule {
    pub const fn inline(name: &'static str, selectors: &'static [&'static str]) -> Self {
        Self {
            name,
            selectors,
            join: TextJoin::Inline,
        }
    }

    pub const fn lines(name: &'static str, selectors: &'static [&'static str]) -> Self {
        Self {
            name,
            selectors,
            join: TextJoin::Lines,
        }
    }
}

/// A parsed page snapshot.
pub struct PageSnapshot {
    document: Html,
    normalizer: TextNormalizer,
}

impl PageSnapshot {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            normalizer: TextNormalizer::new(),
        }
    }

    pub fn resolve(&self, rule: &FieldRule) -> Located<String> {
        for (index, raw) in rule.selectors.iter().enumerate() {
            let Ok(selector) = Selector::parse(raw) else {
                debug!(field = rule.name, selector = raw, "Unparseable selector skipped");
                continue;
            };
            let Some(element) = self.document.select(&selector).next() else {
                continue;
            };
            let text = self.collect_text(element, rule.join);
            if !text.is_empty() {
                return Located::Found {
                    value: text,
                    strategy: index,
                };
            }
        }
        debug!(field = rule.name, "No selector matched");
        Located::NotFound
    }

    fn collect_text(&self, element: ElementRef<'_>, join: TextJoin) -> String {
        let pieces: Vec<&str> = element
            .text()
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .collect();
        match join {
            TextJoin::Inline => self.normalizer.inline(&pieces.join(" ")),
            TextJoin::Lines => self.normalizer.block(&pieces.join("\n")),
        }
    }
}
