use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::category::normalize;

/// Rule key of the space that receives every page no rule claims.
pub const DEFAULT_SPACE_RULE: &str = "general-guidance";

/// One row of the space table: pages declaring any of `labels` land in `key`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SpaceRule {
    pub key: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl SpaceRule {
    pub fn space_key(&self) -> String {
        space_key(&self.key)
    }

    pub fn space_name(&self) -> String {
        space_name(&self.key)
    }

    pub fn normalized_labels(&self) -> Vec<String> {
        self.labels.iter().map(|label| normalize(label)).collect()
    }
}

/// Ordered, immutable space table loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRules {
    rules: Vec<SpaceRule>,
    triggers: Vec<BTreeSet<String>>,
}

impl SpaceRules {
    pub fn new(rules: Vec<SpaceRule>) -> Self {
        let triggers = rules
            .iter()
            .map(|rule| rule.normalized_labels().into_iter().collect())
            .collect();
        Self { rules, triggers }
    }

    pub fn rules(&self) -> &[SpaceRule] {
        &self.rules
    }

    pub fn default_space_key(&self) -> String {
        space_key(DEFAULT_SPACE_RULE)
    }

    /// Space key of the first rule, in table order, whose normalized labels
    /// intersect the normalized categories; the default space otherwise.
    pub fn classify<I, S>(&self, page_categories: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories = page_categories
            .into_iter()
            .map(|category| normalize(category.as_ref()))
            .collect::<BTreeSet<_>>();

        for (rule, triggers) in self.rules.iter().zip(&self.triggers) {
            if !triggers.is_disjoint(&categories) {
                return rule.space_key();
            }
        }
        self.default_space_key()
    }

    /// Every normalized trigger label across the table, in table order.
    pub fn normalized_labels(&self) -> Vec<String> {
        self.rules
            .iter()
            .flat_map(SpaceRule::normalized_labels)
            .collect()
    }
}

/// `general-guidance` -> `generalguidance`
pub fn space_key(rule_key: &str) -> String {
    rule_key.split('-').collect()
}

/// `general-guidance` -> `General Guidance`
pub fn space_name(rule_key: &str) -> String {
    rule_key
        .split('-')
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{SpaceRule, SpaceRules, space_key, space_name};
    use crate::config::default_config;

    fn rule(key: &str, labels: &[&str]) -> SpaceRule {
        SpaceRule {
            key: key.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        }
    }

    #[test]
    fn classify_matches_normalized_categories() {
        let rules = default_config().expect("defaults").space_rules();
        assert_eq!(
            rules.classify(["Category:2017 Team Training"]),
            "internaltraining"
        );
        assert_eq!(
            rules.classify(["SAP_05.01:_External_Communications"]),
            "standardprocedures"
        );
    }

    #[test]
    fn classify_defaults_without_match() {
        let rules = default_config().expect("defaults").space_rules();
        assert_eq!(rules.classify(Vec::<String>::new()), "generalguidance");
        assert_eq!(rules.classify(["Maps", "Category:Logistics"]), "generalguidance");
    }

    #[test]
    fn classify_breaks_ties_by_table_order() {
        let rules = SpaceRules::new(vec![
            rule("first-space", &["Shared Topic"]),
            rule("second-space", &["Shared Topic", "Other"]),
        ]);
        for _ in 0..5 {
            assert_eq!(rules.classify(["Other", "Shared Topic"]), "firstspace");
            assert_eq!(rules.classify(["Shared_Topic", "Other"]), "firstspace");
        }

        let reversed = SpaceRules::new(vec![
            rule("second-space", &["Shared Topic", "Other"]),
            rule("first-space", &["Shared Topic"]),
        ]);
        assert_eq!(reversed.classify(["Shared Topic"]), "secondspace");
    }

    #[test]
    fn space_key_and_name_formatting() {
        assert_eq!(space_key("general-guidance"), "generalguidance");
        assert_eq!(space_name("general-guidance"), "General Guidance");
        assert_eq!(space_name("internal-training"), "Internal Training");
        assert_eq!(rule("standard-procedures", &[]).space_key(), "standardprocedures");
    }
}
