//! Orchestrator configuration.
//!
//! Round limits, caps and the heuristic keyword sets live here so they can be
//! tuned or swapped per locale without touching the control loop.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::persist::PersistError;

/// Default number of context-gathering rounds per update.
pub const DEFAULT_SEARCH_ROUNDS: usize = 2;
/// Default cap on entities read per type per round.
pub const DEFAULT_SEARCH_LIMIT: usize = 4;
/// Default max length of one packed context line.
pub const DEFAULT_CONTEXT_LINE_LIMIT: usize = 320;
/// Default number of collect/validate rounds.
pub const DEFAULT_VALIDATE_ROUNDS: usize = 2;
/// Default number of actions a collector proposes.
pub const DEFAULT_ACTION_CAP: usize = 3;
/// Ceiling the adaptive action cap can grow to.
pub const MAX_ACTION_CAP: usize = 8;
/// Texts longer than this with no keyword signal update both stores.
pub const DEFAULT_LONG_TEXT_THRESHOLD: usize = 120;

/// What to do when every validation round rejects the proposed actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Apply the last proposed actions anyway and log a warning.
    #[default]
    FailOpen,
    /// Apply nothing and log a warning.
    FailClosed,
}

/// Keyword lists used by the heuristic fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSets {
    /// Nouns that suggest the world tree must change.
    #[serde(default)]
    pub world: Vec<String>,
    /// Nouns that suggest the character roster must change.
    #[serde(default)]
    pub character: Vec<String>,
    /// Words that announce one polity absorbing another.
    #[serde(default)]
    pub merger: Vec<String>,
    /// Words that announce a new character entering the story.
    #[serde(default)]
    pub character_intro: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl KeywordSets {
    /// English keyword set.
    pub fn english() -> Self {
        Self {
            world: owned(&[
                "kingdom", "empire", "war", "faction", "region", "city", "nation", "territory",
                "border", "alliance", "treaty", "economy", "culture", "religion", "government",
                "province", "capital", "trade", "famine", "plague", "rebellion", "dynasty",
            ]),
            character: owned(&[
                "character", "ally", "enemy", "hero", "villain", "protagonist", "companion",
                "mentor", "rival", "personality", "backstory", "betrays", "joins", "dies",
            ]),
            merger: owned(&["merge", "merges", "merged", "annex", "annexes", "annexed", "absorbed", "absorbs"]),
            character_intro: owned(&[
                "new character", "appears", "arrives", "introduce", "introduces", "stranger",
            ]),
        }
    }

    /// Chinese keyword set.
    pub fn chinese() -> Self {
        Self {
            world: owned(&[
                "国家", "王国", "帝国", "战争", "势力", "地区", "城市", "政权", "领土", "边境",
                "联盟", "条约", "经济", "文化", "宗教", "政府", "首都", "贸易", "叛乱",
            ]),
            character: owned(&["角色", "人物", "盟友", "敌人", "英雄", "反派", "主角", "同伴", "导师", "性格"]),
            merger: owned(&["合并", "并入", "吞并", "并吞", "并为", "归并"]),
            character_intro: owned(&["新角色", "登场", "出现"]),
        }
    }

    /// Union of two sets, preserving order and dropping repeats.
    pub fn union(mut self, other: KeywordSets) -> Self {
        fn extend(into: &mut Vec<String>, from: Vec<String>) {
            for word in from {
                if !into.contains(&word) {
                    into.push(word);
                }
            }
        }
        extend(&mut self.world, other.world);
        extend(&mut self.character, other.character);
        extend(&mut self.merger, other.merger);
        extend(&mut self.character_intro, other.character_intro);
        self
    }

    /// Parse a keyword set from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a keyword set from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(Self::from_json_str(&content)?)
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::english().union(Self::chinese())
    }
}

/// Whether `keyword` occurs in `text`.
///
/// ASCII keywords match case-insensitively on word boundaries; anything else
/// (CJK in particular) matches as a plain substring.
pub fn keyword_matches(text: &str, keyword: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }
    let haystack = text.to_ascii_lowercase();
    let needle = keyword.to_ascii_lowercase();
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Whether any keyword in the list occurs in `text`.
pub fn any_keyword(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| keyword_matches(text, k))
}

/// Configuration for the update orchestrator.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Context-gathering rounds per gather call.
    pub search_rounds: usize,
    /// Entities read per type per round.
    pub search_limit: usize,
    /// Max length of one packed context line.
    pub context_line_limit: usize,
    /// Collect/validate rounds.
    pub validate_rounds: usize,
    /// Behaviour when validation never succeeds.
    pub validation_policy: ValidationPolicy,
    /// Baseline number of actions per collector call.
    pub action_cap: usize,
    /// Upper bound for the adaptive action cap.
    pub max_action_cap: usize,
    /// Length above which a signal-free text updates both stores.
    pub long_text_threshold: usize,
    /// Ask the oracle for prose history summaries.
    pub oracle_summaries: bool,
    /// Heuristic keyword lists.
    pub keywords: KeywordSets,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            search_rounds: DEFAULT_SEARCH_ROUNDS,
            search_limit: DEFAULT_SEARCH_LIMIT,
            context_line_limit: DEFAULT_CONTEXT_LINE_LIMIT,
            validate_rounds: DEFAULT_VALIDATE_ROUNDS,
            validation_policy: ValidationPolicy::default(),
            action_cap: DEFAULT_ACTION_CAP,
            max_action_cap: MAX_ACTION_CAP,
            long_text_threshold: DEFAULT_LONG_TEXT_THRESHOLD,
            oracle_summaries: false,
            keywords: KeywordSets::default(),
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_rounds(mut self, rounds: usize) -> Self {
        self.search_rounds = rounds;
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    pub fn with_context_line_limit(mut self, limit: usize) -> Self {
        self.context_line_limit = limit;
        self
    }

    pub fn with_validate_rounds(mut self, rounds: usize) -> Self {
        self.validate_rounds = rounds.max(1);
        self
    }

    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    /// Set the baseline and ceiling for collector action caps.
    pub fn with_action_caps(mut self, base: usize, max: usize) -> Self {
        self.action_cap = base.max(1);
        self.max_action_cap = max.max(self.action_cap);
        self
    }

    pub fn with_long_text_threshold(mut self, threshold: usize) -> Self {
        self.long_text_threshold = threshold;
        self
    }

    pub fn with_oracle_summaries(mut self, enabled: bool) -> Self {
        self.oracle_summaries = enabled;
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordSets) -> Self {
        self.keywords = keywords;
        self
    }

    /// Action cap for a text mentioning `mentions` distinct known entities.
    pub fn action_cap_for(&self, mentions: usize) -> usize {
        mentions.clamp(self.action_cap, self.max_action_cap)
    }
}
