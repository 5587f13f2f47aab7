//! Local rule-based headline classifier.
//!
//! Rules are evaluated in order and the first satisfied rule wins. Keywords
//! match case-insensitively on whole-word boundaries, so "art" does not fire
//! on "start". Keywords are user data and are escaped before compilation.

use regex::Regex;
use tracing::warn;

use crate::category::Category;
use crate::rules::{FilterRule, RuleKind};

/// Classify one headline against `rules`.
pub fn classify(headline: &str, rules: &[FilterRule]) -> Category {
    RuleSet::compile(rules).classify(headline)
}

/// Classify many headlines, one category per headline, in input order.
pub fn classify_batch<S: AsRef<str>>(headlines: &[S], rules: &[FilterRule]) -> Vec<Category> {
    RuleSet::compile(rules).classify_batch(headlines)
}

/// A rule set with every keyword compiled to a regex, ready for repeated use.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    category: Category,
    kind: RuleKind,
    patterns: Vec<Regex>,
    // An AND rule with a keyword that failed to compile can never be satisfied.
    unsatisfiable: bool,
}

impl RuleSet {
    pub fn compile(rules: &[FilterRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let mut patterns = Vec::new();
                let mut unsatisfiable = false;
                for keyword in rule.keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
                    match keyword_pattern(keyword) {
                        Ok(re) => patterns.push(re),
                        Err(e) => {
                            warn!("rules: invalid keyword {:?} in rule {}: {}", keyword, rule.id, e);
                            unsatisfiable = true;
                        }
                    }
                }
                CompiledRule {
                    category: rule.category,
                    kind: rule.kind,
                    patterns,
                    unsatisfiable,
                }
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, headline: &str) -> Category {
        if headline.trim().is_empty() {
            return Category::FALLBACK;
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(headline))
            .map(|rule| rule.category)
            .unwrap_or(Category::FALLBACK)
    }

    pub fn classify_batch<S: AsRef<str>>(&self, headlines: &[S]) -> Vec<Category> {
        headlines.iter().map(|h| self.classify(h.as_ref())).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl CompiledRule {
    fn matches(&self, headline: &str) -> bool {
        match self.kind {
            RuleKind::Or => self.patterns.iter().any(|re| re.is_match(headline)),
            RuleKind::And => {
                !self.unsatisfiable
                    && !self.patterns.is_empty()
                    && self.patterns.iter().all(|re| re.is_match(headline))
            }
        }
    }
}

/// Word boundaries are only asserted on keyword edges that are word characters;
/// a keyword such as "c++" would otherwise never match.
fn keyword_pattern(keyword: &str) -> Result<Regex, regex::Error> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let starts = keyword.chars().next().map(is_word).unwrap_or(false);
    let ends = keyword.chars().last().map(is_word).unwrap_or(false);
    let pattern = format!(
        "(?i){}{}{}",
        if starts { r"\b" } else { "" },
        regex::escape(keyword),
        if ends { r"\b" } else { "" },
    );
    Regex::new(&pattern)
}
