use serde::{Deserialize, Serialize};

/// How urgently a matched rule must be addressed before migrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Potential,
    Optional,
    Mandatory,
}

impl Default for Category {
    fn default() -> Self {
        Category::Potential
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Potential => write!(f, "potential"),
            Category::Optional => write!(f, "optional"),
            Category::Mandatory => write!(f, "mandatory"),
        }
    }
}

/// External reference attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Everything about a rule except its condition tree.
///
/// `labels` is the effective set: the rule's own labels plus those inherited
/// from its rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMeta {
    #[serde(rename = "ruleID")]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    /// Message template over chain variables, `{{name.field}}` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Tags added to the run's tag set when the rule matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Metadata of a named bundle of rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
}
