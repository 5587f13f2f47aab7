use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::category::Category;
use crate::classifier::RuleSet;
use crate::storage::SlotStore;

/// How the keywords of a rule combine. Written as `AND`/`OR`, read in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RuleKind {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl TryFrom<String> for RuleKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("and") {
            Ok(RuleKind::And)
        } else if value.eq_ignore_ascii_case("or") {
            Ok(RuleKind::Or)
        } else {
            Err(format!("unknown rule type: {}", value))
        }
    }
}

/// Rule ids were numbers in older exports.
fn id_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid rule id: {}", other))),
    }
}

/// User-editable keyword rule. Rule order in a set is evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// Empty entries are allowed (the editor creates them) and are ignored.
    pub keywords: Vec<String>,
}

impl FilterRule {
    /// A fresh, empty rule as created by the rule editor.
    pub fn new(category: Category, kind: RuleKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            kind,
            keywords: Vec::new(),
        }
    }
}

fn or_rule(id: &str, category: Category, keywords: &[&str]) -> FilterRule {
    FilterRule {
        id: id.to_string(),
        category,
        kind: RuleKind::Or,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

/// Built-in rule set used when nothing valid has been persisted.
pub fn default_rules() -> Vec<FilterRule> {
    vec![
        or_rule("1", Category::Politics, &[
            "immigration", "detention", "government", "parliament", "election", "minister",
            "senate", "congress", "president", "chancellor", "party", "coalition", "legislation",
            "law", "bill", "diplomat", "policy", "vote", "campaign", "opposition", "democracy",
            "referendum",
        ]),
        or_rule("2", Category::Business, &[
            "stock", "market", "shares", "corporation", "company", "CEO", "profit", "loss",
            "revenue", "GDP", "inflation", "recession", "trade", "export", "import", "investment",
            "merger", "acquisition", "employment", "unemployment", "interest rate", "central bank",
            "economy", "industry",
        ]),
        or_rule("3", Category::General, &[
            "accident", "incident", "crime", "police", "court", "trial", "victim", "witness",
            "disaster", "emergency", "rescue", "fire", "flood", "weather", "community", "people",
            "daily life", "society",
        ]),
        or_rule("4", Category::Sports, &[
            "football", "soccer", "basketball", "tennis", "championship", "league", "tournament",
            "match", "game", "player", "athlete", "coach", "team", "goal", "score", "win",
            "defeat", "Olympic", "World Cup", "medal", "training",
        ]),
        or_rule("5", Category::Culture, &[
            "art", "artist", "exhibition", "museum", "theater", "film", "movie", "cinema",
            "actor", "director", "music", "concert", "festival", "book", "author", "literature",
            "performance", "culture", "heritage", "gallery",
        ]),
        or_rule("6", Category::Tech, &[
            "software", "hardware", "smartphone", "app", "digital", "internet", "computer", "AI",
            "artificial intelligence", "data", "cybersecurity", "innovation", "startup",
            "tech company", "platform", "cloud", "algorithm", "programming", "device",
        ]),
        or_rule("7", Category::Health, &[
            "hospital", "doctor", "patient", "disease", "treatment", "medical", "medicine",
            "vaccine", "virus", "pandemic", "healthcare", "clinic", "surgery", "therapy",
            "mental health", "diagnosis", "symptoms", "pharmaceutical", "prevention",
        ]),
        or_rule("8", Category::Science, &[
            "research", "study", "scientist", "university", "laboratory", "discovery",
            "experiment", "theory", "climate", "environment", "space", "NASA", "physics",
            "chemistry", "biology", "findings", "journal", "publication",
        ]),
        or_rule("9", Category::Lifestyle, &[
            "fashion", "beauty", "travel", "food", "recipe", "wellness", "fitness", "home",
            "design", "shopping", "trends", "style", "relationship", "family", "parenting",
            "hobby", "leisure",
        ]),
        or_rule("10", Category::Local, &[
            "city council", "mayor", "neighborhood", "district", "local community", "town",
            "municipal", "regional", "resident", "downtown", "suburb", "county", "township",
            "borough",
        ]),
    ]
}

/// Parse a persisted rule set, skipping entries that are not well-formed
/// rules. `None` when the value is not a sequence, or when a non-empty
/// sequence holds no usable rule at all.
pub fn parse_rules(raw: &str) -> Option<Vec<FilterRule>> {
    let entries = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("rules: persisted rule set is invalid, using defaults: {}", e);
            return None;
        }
    };

    let total = entries.len();
    let mut rules = Vec::with_capacity(total);
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<FilterRule>(entry) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!("rules: skipping persisted rule #{}: {}", index, e),
        }
    }

    if total > 0 && rules.is_empty() {
        warn!("rules: none of the {} persisted rules are usable, using defaults", total);
        return None;
    }
    Some(rules)
}

struct Loaded {
    rules: Vec<FilterRule>,
    compiled: Arc<RuleSet>,
}

impl Loaded {
    fn new(rules: Vec<FilterRule>) -> Self {
        let compiled = Arc::new(RuleSet::compile(&rules));
        Self { rules, compiled }
    }
}

/// Holds the active rule set and its persisted copy.
///
/// The compiled form is rebuilt only when the set is replaced.
pub struct RuleStore {
    store: Arc<dyn SlotStore>,
    slot: String,
    current: RwLock<Loaded>,
}

impl RuleStore {
    pub async fn open(store: Arc<dyn SlotStore>, slot: impl Into<String>) -> Self {
        let slot = slot.into();
        let rules = load_rules(store.as_ref(), &slot).await;
        info!("rules: loaded {} rules from slot {}", rules.len(), slot);
        Self {
            store,
            slot,
            current: RwLock::new(Loaded::new(rules)),
        }
    }

    /// Re-read the persisted set (or defaults) without touching the active one.
    pub async fn load_rules(&self) -> Vec<FilterRule> {
        load_rules(self.store.as_ref(), &self.slot).await
    }

    /// Replace the whole rule set. On error neither the persisted nor the
    /// active set has changed.
    pub async fn save_rules(&self, rules: Vec<FilterRule>) -> Result<()> {
        let serialized = serde_json::to_string(&rules).context("failed to serialize rules")?;
        let mut current = self.current.write().await;
        self.store
            .write(&self.slot, &serialized)
            .await
            .context("failed to persist rules")?;
        *current = Loaded::new(rules);
        info!("rules: saved {} rules", current.rules.len());
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.save_rules(default_rules()).await
    }

    pub async fn rules(&self) -> Vec<FilterRule> {
        self.current.read().await.rules.clone()
    }

    /// Compiled view of the active set for the classifier.
    pub async fn rule_set(&self) -> Arc<RuleSet> {
        self.current.read().await.compiled.clone()
    }
}

async fn load_rules(store: &dyn SlotStore, slot: &str) -> Vec<FilterRule> {
    match store.read(slot).await {
        Ok(Some(raw)) => parse_rules(&raw).unwrap_or_else(default_rules),
        Ok(None) => default_rules(),
        Err(e) => {
            warn!("rules: failed to read slot {}: {:#}", slot, e);
            default_rules()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySlotStore;

    const SLOT: &str = "lecta_filter_rules";

    #[tokio::test]
    async fn missing_slot_yields_defaults() {
        let store = RuleStore::open(Arc::new(MemorySlotStore::new()), SLOT).await;
        assert_eq!(store.rules().await, default_rules());
        assert_eq!(store.rule_set().await.len(), 10);
    }

    #[tokio::test]
    async fn malformed_slot_yields_defaults() {
        for raw in [
            "not json",
            "{\"id\":\"1\"}",
            "[{\"id\":\"1\",\"category\":\"Sports\"}]",
            "42",
        ] {
            let slots = Arc::new(MemorySlotStore::with_slot(SLOT, raw));
            let store = RuleStore::open(slots, SLOT).await;
            assert_eq!(store.rules().await, default_rules(), "input: {}", raw);
        }
    }

    #[tokio::test]
    async fn loose_entries_keep_the_user_set() {
        let raw = r#"[
            {"id":"u1","category":"Sports","type":"OR","keywords":["cricket"]},
            {"id":7,"category":"Tech","type":"or","keywords":["robot"]},
            {"id":"bad","category":"Tech"}
        ]"#;
        let slots = Arc::new(MemorySlotStore::with_slot(SLOT, raw));
        let store = RuleStore::open(slots, SLOT).await;

        let rules = store.rules().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].id, "7");
        assert_eq!(rules[1].kind, RuleKind::Or);
        let set = store.rule_set().await;
        assert_eq!(set.classify("Cricket test resumes"), Category::Sports);
        assert_eq!(set.classify("Robot vacuums sell out"), Category::Tech);
    }

    #[test]
    fn rule_kind_is_written_upper_case() {
        let mut rule = FilterRule::new(Category::Local, RuleKind::And);
        rule.id = "x".to_string();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "AND");
        assert_eq!(parse_rules("[]"), Some(Vec::new()));
    }

    #[tokio::test]
    async fn persisted_rules_are_used_in_order() {
        let raw = r#"[
            {"id":"a","category":"Sports","type":"AND","keywords":["final","",  "cup"]},
            {"id":"b","category":"Tech","type":"OR","keywords":["robot"]}
        ]"#;
        let slots = Arc::new(MemorySlotStore::with_slot(SLOT, raw));
        let store = RuleStore::open(slots, SLOT).await;

        let rules = store.rules().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "a");
        assert_eq!(rules[0].kind, RuleKind::And);
        assert_eq!(rules[1].category, Category::Tech);
    }

    #[tokio::test]
    async fn save_replaces_set_and_recompiles() {
        let slots = Arc::new(MemorySlotStore::new());
        let store = RuleStore::open(slots.clone(), SLOT).await;

        let mut rule = FilterRule::new(Category::Science, RuleKind::Or);
        rule.keywords.push("telescope".to_string());
        store.save_rules(vec![rule.clone()]).await.unwrap();

        assert_eq!(store.rules().await, vec![rule.clone()]);
        assert_eq!(
            store.rule_set().await.classify("New telescope sees first light"),
            Category::Science
        );
        // senate is no longer a politics keyword
        assert_eq!(store.rule_set().await.classify("Senate votes"), Category::General);

        let reopened = RuleStore::open(slots, SLOT).await;
        assert_eq!(reopened.rules().await, vec![rule]);
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let slots = Arc::new(MemorySlotStore::new());
        let store = RuleStore::open(slots, SLOT).await;
        store.save_rules(Vec::new()).await.unwrap();
        assert!(store.rule_set().await.is_empty());

        store.reset().await.unwrap();
        assert_eq!(store.load_rules().await, default_rules());
    }
}
