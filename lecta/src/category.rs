use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Topical category assigned to an article.
///
/// The set is closed: any external text (remote classifier answers, persisted
/// rules or cache entries) is mapped onto it with [`Category::match_label`]
/// and falls back to [`Category::FALLBACK`] when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Category {
    Politics,
    Business,
    General,
    Sports,
    Culture,
    Tech,
    Health,
    Science,
    Lifestyle,
    Local,
}

impl Category {
    /// Returned when no rule matches and whenever external text cannot be mapped.
    pub const FALLBACK: Category = Category::General;

    pub const ALL: [Category; 10] = [
        Category::Politics,
        Category::Business,
        Category::General,
        Category::Sports,
        Category::Culture,
        Category::Tech,
        Category::Health,
        Category::Science,
        Category::Lifestyle,
        Category::Local,
    ];

    // Labels older revisions and models tend to produce.
    const ALIASES: [(&'static str, Category); 4] = [
        ("news", Category::General),
        ("panorama", Category::General),
        ("economy", Category::Business),
        ("technology", Category::Tech),
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Politics => "Politics",
            Category::Business => "Business",
            Category::General => "General",
            Category::Sports => "Sports",
            Category::Culture => "Culture",
            Category::Tech => "Tech",
            Category::Health => "Health",
            Category::Science => "Science",
            Category::Lifestyle => "Lifestyle",
            Category::Local => "Local",
        }
    }

    /// Fuzzy, case-insensitive mapping of free text onto the closed set.
    ///
    /// Trailing punctuation is stripped, then a canonical label matches when
    /// either string contains the other. Aliases are tried last.
    pub fn match_label(raw: &str) -> Option<Category> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '.' | '!' | '?' | '"' | '\''))
            .collect::<String>()
            .trim()
            .to_lowercase();

        if cleaned.is_empty() {
            return None;
        }

        Self::ALL
            .iter()
            .copied()
            .find(|c| {
                let label = c.label().to_lowercase();
                cleaned.contains(&label) || label.contains(&cleaned)
            })
            .or_else(|| {
                Self::ALIASES
                    .iter()
                    .find(|(alias, _)| cleaned.contains(alias) || alias.contains(cleaned.as_str()))
                    .map(|(_, c)| *c)
            })
    }

    pub fn from_label_or_default(raw: &str) -> Category {
        Self::match_label(raw).unwrap_or(Self::FALLBACK)
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Category::from_label_or_default(&raw)
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_labels_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::match_label(c.label()), Some(c));
        }
    }

    #[test]
    fn fuzzy_match_is_case_insensitive_both_ways() {
        assert_eq!(Category::match_label("  sports. "), Some(Category::Sports));
        assert_eq!(Category::match_label("Category: POLITICS"), Some(Category::Politics));
        // label contains the answer
        assert_eq!(Category::match_label("Lifesty"), Some(Category::Lifestyle));
    }

    #[test]
    fn aliases_map_to_canonical_categories() {
        assert_eq!(Category::match_label("Panorama"), Some(Category::General));
        assert_eq!(Category::match_label("News"), Some(Category::General));
        assert_eq!(Category::match_label("Economy"), Some(Category::Business));
        assert_eq!(Category::match_label("Technology"), Some(Category::Tech));
    }

    #[test]
    fn unknown_text_falls_back() {
        assert_eq!(Category::match_label(""), None);
        assert_eq!(Category::match_label("Quantum gardening"), None);
        assert_eq!(Category::from_label_or_default("Quantum gardening"), Category::General);
    }

    #[test]
    fn serde_uses_labels_and_tolerates_garbage() {
        let json = serde_json::to_string(&Category::Tech).unwrap();
        assert_eq!(json, "\"Tech\"");
        let parsed: Category = serde_json::from_str("\"sport\"").unwrap();
        assert_eq!(parsed, Category::Sports);
        let parsed: Category = serde_json::from_str("\"???\"").unwrap();
        assert_eq!(parsed, Category::General);
    }
}
