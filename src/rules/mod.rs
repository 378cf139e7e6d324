//! Rule sets: the predicates behind search folders.
//!
//! Rule kinds form a fixed registry. Each has a stable id (persisted in
//! OPML), dialog texts for both polarities, and a check function run
//! against a stored item row. `additive = false` negates a rule.

pub mod search_folder;

pub use search_folder::SearchFolder;

use crate::storage::Item;

// ============================================================================
// Registry
// ============================================================================

/// Description of one rule kind.
pub struct RuleInfo {
    /// Stable id for persistence.
    pub id: &'static str,
    /// Rule title for dialogs.
    pub title: &'static str,
    /// Text for positive logic selection.
    pub positive: &'static str,
    /// Text for negative logic selection.
    pub negative: &'static str,
    /// Some rules require no parameter.
    pub needs_value: bool,
    check: fn(&Item, &str) -> bool,
}

fn check_exact(item: &Item, value: &str) -> bool {
    let value = value.to_lowercase();
    item.title.to_lowercase().contains(&value)
        || item
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&value))
}

fn check_exact_title(item: &Item, value: &str) -> bool {
    item.title.to_lowercase().contains(&value.to_lowercase())
}

fn check_exact_desc(item: &Item, value: &str) -> bool {
    item.description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(&value.to_lowercase()))
}

fn check_category(item: &Item, value: &str) -> bool {
    item.categories().any(|c| c.eq_ignore_ascii_case(value))
}

fn check_unread(item: &Item, _value: &str) -> bool {
    !item.read
}

fn check_flagged(item: &Item, _value: &str) -> bool {
    item.flagged
}

fn check_enclosure(item: &Item, _value: &str) -> bool {
    item.has_enclosure()
}

/// The list of implemented rules.
pub const RULES: &[RuleInfo] = &[
    RuleInfo {
        id: "exact",
        title: "Item",
        positive: "does contain",
        negative: "does not contain",
        needs_value: true,
        check: check_exact,
    },
    RuleInfo {
        id: "exact_title",
        title: "Item title",
        positive: "does contain",
        negative: "does not contain",
        needs_value: true,
        check: check_exact_title,
    },
    RuleInfo {
        id: "exact_desc",
        title: "Item body",
        positive: "does contain",
        negative: "does not contain",
        needs_value: true,
        check: check_exact_desc,
    },
    RuleInfo {
        id: "category",
        title: "Category",
        positive: "is set",
        negative: "is not set",
        needs_value: true,
        check: check_category,
    },
    RuleInfo {
        id: "unread",
        title: "Read status",
        positive: "is unread",
        negative: "is read",
        needs_value: false,
        check: check_unread,
    },
    RuleInfo {
        id: "flagged",
        title: "Flag status",
        positive: "is flagged",
        negative: "is unflagged",
        needs_value: false,
        check: check_flagged,
    },
    RuleInfo {
        id: "enclosure",
        title: "Podcast",
        positive: "included",
        negative: "not included",
        needs_value: false,
        check: check_enclosure,
    },
];

/// Look up a rule kind by its stable id.
pub fn rule_info(id: &str) -> Option<&'static RuleInfo> {
    RULES.iter().find(|info| info.id == id)
}

// ============================================================================
// Rules & rule sets
// ============================================================================

/// One rule instance inside a rule set.
#[derive(Clone)]
pub struct Rule {
    pub info: &'static RuleInfo,
    /// The rule parameter, e.g. a search text. Empty for valueless rules.
    pub value: String,
    /// Positive logic; false negates the check.
    pub additive: bool,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.info.id)
            .field("value", &self.value)
            .field("additive", &self.additive)
            .finish()
    }
}

impl Rule {
    /// Instantiate a rule by registry id; None for unknown ids.
    pub fn new(id: &str, value: &str, additive: bool) -> Option<Self> {
        rule_info(id).map(|info| Rule {
            info,
            value: value.to_string(),
            additive,
        })
    }

    pub fn check(&self, item: &Item) -> bool {
        let hit = (self.info.check)(item, &self.value);
        if self.additive {
            hit
        } else {
            !hit
        }
    }
}

/// Match mode of a rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// At least one rule must match.
    Any,
    /// Every rule must match.
    #[default]
    All,
}

/// An ordered list of rules plus the match mode.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub mode: MatchMode,
    /// Restrict matches to unread items regardless of the rules.
    pub unread_only: bool,
}

impl RuleSet {
    /// Append a rule by registry id; unknown ids are ignored with a log.
    pub fn add_rule(&mut self, id: &str, value: &str, additive: bool) {
        match Rule::new(id, value, additive) {
            Some(rule) => self.rules.push(rule),
            None => tracing::warn!(rule = id, "unknown search folder rule id"),
        }
    }

    /// Evaluate the whole set against one item row.
    pub fn matches(&self, item: &Item) -> bool {
        if self.unread_only && item.read {
            return false;
        }
        if self.rules.is_empty() {
            return false;
        }
        match self.mode {
            MatchMode::Any => self.rules.iter().any(|rule| rule.check(item)),
            MatchMode::All => self.rules.iter().all(|rule| rule.check(item)),
        }
    }

    /// Whether any rule in the set reads the given item column.
    ///
    /// Used for incremental invalidation: a read-state flip only needs to
    /// re-test rule sets that care about read state.
    pub fn uses_rule(&self, id: &str) -> bool {
        self.rules.iter().any(|rule| rule.info.id == id)
    }
}
