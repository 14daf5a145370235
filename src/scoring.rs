use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{ScoreResult, Template};

const RUMOR_KEYWORDS: [&str; 5] = ["rumor", "rumours", "unconfirmed", "allegedly", "alleged"];
const ANNOUNCEMENT_KEYWORDS: [&str; 6] = [
    "announcement",
    "launch",
    "partnership",
    "capability",
    "unveiled",
    "released",
];

pub const RISK_HIGH: &str = "high";

/// Rules file layout (TOML).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RulesFile {
    #[serde(alias = "rumor_intel")]
    pub rumor_keywords: Option<Vec<String>>,
    #[serde(alias = "flash_editorial")]
    pub announcement_keywords: Option<Vec<String>>,
    pub source_tiers: SourceTiers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SourceTiers {
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
    pub tier3: Vec<String>,
}

/// Compiled keyword matchers and the source tier map.
pub struct RuleSet {
    rumor: Option<Regex>,
    announcement: Option<Regex>,
    tier1: HashSet<String>,
    tier2: HashSet<String>,
}

impl RuleSet {
    pub fn from_file(rules: RulesFile) -> Result<Self> {
        let rumor = rules
            .rumor_keywords
            .unwrap_or_else(|| RUMOR_KEYWORDS.iter().map(|s| s.to_string()).collect());
        let announcement = rules
            .announcement_keywords
            .unwrap_or_else(|| ANNOUNCEMENT_KEYWORDS.iter().map(|s| s.to_string()).collect());
        let trim_set = |names: Vec<String>| -> HashSet<String> {
            names.into_iter().map(|n| n.trim().to_string()).collect()
        };
        Ok(Self {
            rumor: keyword_regex(&rumor)?,
            announcement: keyword_regex(&announcement)?,
            tier1: trim_set(rules.source_tiers.tier1),
            tier2: trim_set(rules.source_tiers.tier2),
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::from_file(RulesFile::default())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Self::from_file(toml::from_str(content)?)
    }

    /// Loads the rules file if configured and present, otherwise the built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path.map(Path::new) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                info!(path = %path.display(), "loaded scoring rules");
                Self::from_toml(&content)
            }
            Some(path) => {
                warn!(path = %path.display(), "scoring rules file not found, using defaults");
                Self::defaults()
            }
            None => Self::defaults(),
        }
    }

    /// 1 is the most trusted tier; unknown sources are tier 3.
    pub fn source_tier(&self, source_name: Option<&str>) -> u8 {
        let name = source_name.unwrap_or("").trim();
        if self.tier1.contains(name) {
            1
        } else if self.tier2.contains(name) {
            2
        } else {
            3
        }
    }

    /// Rumor keywords win over everything: high risk, intel template, human review.
    /// Otherwise announcement keywords select the flash template.
    pub fn score(&self, title: &str, summary: Option<&str>, source_name: Option<&str>) -> ScoreResult {
        let text = format!("{} {}", title, summary.unwrap_or("")).to_lowercase();
        let matches = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(&text));

        let (risk, template, needs_review) = if matches(&self.rumor) {
            (Some(RISK_HIGH.to_string()), Template::AnaliseIntel, true)
        } else if matches(&self.announcement) {
            (None, Template::FlashSetorial, false)
        } else {
            (None, Template::Default, false)
        };

        let tier = self.source_tier(source_name);
        let high_impact = risk.is_some() || template == Template::FlashSetorial;
        let priority = match tier {
            1 if high_impact => 0,
            1 | 2 => 1,
            _ => 2,
        };

        ScoreResult {
            priority,
            risk,
            template,
            needs_review,
        }
    }
}

/// One alternation of word-bounded, escaped keywords, or `None` for an empty list.
fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .map(|k| regex::escape(&k))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| AppError::Config(format!("invalid keyword pattern: {e}")))
}
