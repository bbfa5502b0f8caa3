//! Chat message screening.
//!
//! DESIGN
//! ======
//! A fixed rule table of case-insensitive patterns, grouped by category.
//! [`screen`] runs every rule against a message and returns one [`Alert`]
//! per matching rule, so a message can raise several alerts at once.
//!
//! | Category             | Severity | Looks for                                  |
//! |----------------------|----------|--------------------------------------------|
//! | `external_platform`  | high     | moving the deal to another messenger       |
//! | `urgency_pressure`   | medium   | urgent demands for payment                 |
//! | `suspicious_amounts` | medium   | talk of changing the agreed amount         |
//!
//! The chat manager refuses to post any message that raises an alert.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::frame::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    ExternalPlatform,
    UrgencyPressure,
    SuspiciousAmounts,
}

impl AlertCategory {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::ExternalPlatform => Severity::High,
            Self::UrgencyPressure | Self::SuspiciousAmounts => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

/// One rule that matched a screened message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub pattern_matched: String,
    pub severity: Severity,
    /// Epoch milliseconds at screening time.
    pub timestamp: i64,
}

const RULES: &[(AlertCategory, &str)] = &[
    (
        AlertCategory::ExternalPlatform,
        r"(?i)let's (?:continue|talk|chat|move) (?:on|to) (?:whatsapp|telegram|messenger|signal|wechat|viber)",
    ),
    (
        AlertCategory::ExternalPlatform,
        r"(?i)(?:whatsapp|telegram|messenger|signal|wechat|viber)[\s]*?(?:number|contact|id)?[\s]*?[:\s]+[\d\w@]+",
    ),
    (AlertCategory::UrgencyPressure, r"(?i)urgent(?:ly)? need"),
    (AlertCategory::UrgencyPressure, r"(?i)(?:transfer|send|pay).*?now.*?urgent"),
    (AlertCategory::SuspiciousAmounts, r"(?i)different amount"),
    (AlertCategory::SuspiciousAmounts, r"(?i)change(?:d) (?:the )?(?:amount|price)"),
];

static COMPILED: LazyLock<Vec<(AlertCategory, Regex)>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|&(category, pattern)| (category, Regex::new(pattern).expect("screening pattern should compile")))
        .collect()
});

/// Run every rule against `text`. An empty result means the message is clean.
#[must_use]
pub fn screen(text: &str) -> Vec<Alert> {
    let timestamp = now_ms();
    COMPILED
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(category, re)| Alert {
            category: *category,
            pattern_matched: re.as_str().to_owned(),
            severity: category.severity(),
            timestamp,
        })
        .collect()
}

#[cfg(test)]
#[path = "screening_test.rs"]
mod tests;
