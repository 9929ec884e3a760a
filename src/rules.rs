//! Offline rule engine: age/text-matched clinical heuristics that produce an
//! immediate risk classification with no network access.
//!
//! Rules live in a fixed, declared order and the first matching rule wins.
//! That ordering is semantically significant (earlier rules are the more
//! specific ones), so the set is a slice, never a map.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::{self, KeyValueStore};
use crate::types::{ResponseMode, RuleId};

/// One age/text heuristic with a fixed payload.
pub struct OfflineRule {
    pub id: &'static str,
    pub domain: &'static str,
    /// Inclusive age window in months.
    pub age_months: (u32, u32),
    matcher: fn(u32, &str) -> bool,
    pub risk: &'static str,
    pub confidence: f64,
    pub summary: &'static [&'static str],
}

impl OfflineRule {
    pub fn matches(&self, age_months: u32, text: &str) -> bool {
        let (lo, hi) = self.age_months;
        age_months >= lo && age_months <= hi && (self.matcher)(age_months, &text.to_lowercase())
    }

    pub fn rule_id(&self) -> RuleId {
        RuleId::new(self.id)
    }
}

fn has_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

// Declared order is the precedence order: first match wins.
static RULES: &[OfflineRule] = &[
    OfflineRule {
        id: "language_18m",
        domain: "language",
        age_months: (12, 20),
        matcher: |_, t| has_any(t, &["no words", "not talking", "no babbling", "doesn't babble"]),
        risk: "discuss",
        confidence: 0.90,
        summary: &["No single words by 18 months (ASQ-3 C1)"],
    },
    OfflineRule {
        id: "language_24m",
        domain: "language",
        age_months: (21, 30),
        matcher: |_, t| {
            has_any(t, &["word", "vocabulary", "combine", "talking"])
                && !has_any(t, &["50", "100", "200"])
        },
        risk: "monitor",
        confidence: 0.94,
        summary: &["Vocabulary below age-expected milestones (ASQ-3 L1)"],
    },
    OfflineRule {
        id: "language_36m",
        domain: "language",
        age_months: (31, 42),
        matcher: |_, t| has_any(t, &["sentence", "unclear", "hard to understand", "strangers"]),
        risk: "discuss",
        confidence: 0.90,
        summary: &["Speech clarity below 36-month expectations (ASQ-3 L2)"],
    },
    OfflineRule {
        id: "motor_12m",
        domain: "motor",
        age_months: (9, 15),
        matcher: |_, t| has_any(t, &["not sitting", "can't sit", "not crawling", "doesn't crawl"]),
        risk: "discuss",
        confidence: 0.92,
        summary: &["Gross motor delay signs at 12 months (ASQ-3 GM1)"],
    },
    OfflineRule {
        id: "motor_18m",
        domain: "motor",
        age_months: (15, 24),
        matcher: |_, t| has_any(t, &["not walking", "can't walk", "doesn't walk"]),
        risk: "discuss",
        confidence: 0.93,
        summary: &["Not walking independently by 18 months (ASQ-3 GM2)"],
    },
    OfflineRule {
        id: "social_18m",
        domain: "social",
        age_months: (12, 24),
        matcher: |_, t| {
            has_any(
                t,
                &["no eye contact", "doesn't point", "not pointing", "doesn't respond to name"],
            )
        },
        risk: "discuss",
        confidence: 0.90,
        summary: &["Reduced joint attention at 18 months (M-CHAT-R screen advised)"],
    },
    OfflineRule {
        id: "cognitive_30m",
        domain: "cognitive",
        age_months: (24, 36),
        matcher: |_, t| has_any(t, &["no pretend play", "doesn't pretend", "doesn't sort"]),
        risk: "monitor",
        confidence: 0.88,
        summary: &["Limited pretend play by 30 months (ASQ-3 PS1)"],
    },
];

pub fn builtin_rules() -> &'static [OfflineRule] {
    RULES
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineResponse {
    pub risk: String,
    pub confidence: f64,
    pub summary: Vec<String>,
    pub mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgraded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement: Option<String>,
}

impl OfflineResponse {
    /// Fallback when no rule matches and nothing is cached for the age bucket.
    pub fn safe_default() -> Self {
        Self {
            risk: "monitor".to_string(),
            confidence: 0.75,
            summary: vec!["Insufficient data — clinician review recommended".to_string()],
            mode: ResponseMode::OfflineSafe,
            rule_id: None,
            upgraded: None,
            improvement: None,
        }
    }

    fn from_rule(rule: &OfflineRule) -> Self {
        Self {
            risk: rule.risk.to_string(),
            confidence: rule.confidence,
            summary: rule.summary.iter().map(|s| s.to_string()).collect(),
            mode: ResponseMode::OfflineRules,
            rule_id: Some(rule.rule_id()),
            upgraded: None,
            improvement: None,
        }
    }
}

pub struct RuleEngine {
    store: Arc<dyn KeyValueStore>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// First declared rule whose predicate matches, or `None`. Never errors.
    pub fn find_match(&self, age_months: u32, free_text: &str) -> Option<&'static OfflineRule> {
        RULES.iter().find(|r| r.matches(age_months, free_text))
    }

    /// Always produces a response: rule match, else a cached response for the
    /// same (rule, age) bucket, else the safe default. Matches are persisted
    /// for reuse as future cache hits; that write is best-effort.
    pub fn evaluate(&self, age_months: u32, free_text: &str) -> OfflineResponse {
        if let Some(rule) = self.find_match(age_months, free_text) {
            let response = OfflineResponse::from_rule(rule);
            storage::mirror(
                self.store.as_ref(),
                &storage::rule_key(&rule.rule_id(), age_months),
                &response,
            );
            return response;
        }

        if let Some(cached) = self.cached_for_age(age_months) {
            return cached;
        }

        OfflineResponse::safe_default()
    }

    fn cached_for_age(&self, age_months: u32) -> Option<OfflineResponse> {
        for rule in RULES {
            let (lo, hi) = rule.age_months;
            if age_months < lo || age_months > hi {
                continue;
            }
            let key = storage::rule_key(&rule.rule_id(), age_months);
            match storage::get_json::<OfflineResponse>(self.store.as_ref(), &key) {
                Ok(Some(cached)) => return Some(cached),
                Ok(None) => {}
                Err(e) => log::warn!("ignoring unreadable rule cache entry {key}: {e}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn language_24m_scenario() {
        let response = engine().evaluate(
            24,
            "My 2-year-old says only about 10 words and doesn't combine them",
        );
        assert_eq!(response.rule_id, Some(RuleId::new("language_24m")));
        assert_eq!(response.risk, "monitor");
        assert_eq!(response.confidence, 0.94);
        assert_eq!(
            response.summary,
            vec!["Vocabulary below age-expected milestones (ASQ-3 L1)"]
        );
        assert_eq!(response.mode, ResponseMode::OfflineRules);
    }

    #[test]
    fn vocabulary_count_suppresses_language_24m() {
        // A reported vocabulary of 50+ words is within expectations.
        let response = engine().evaluate(24, "She says about 50 words now");
        assert_ne!(response.rule_id, Some(RuleId::new("language_24m")));
    }

    #[test]
    fn first_declared_match_wins() {
        // Matches both language_18m and social_18m; language_18m is declared first.
        let rule = engine()
            .find_match(18, "no words yet and no eye contact")
            .unwrap();
        assert_eq!(rule.id, "language_18m");
    }

    #[test]
    fn no_match_returns_safe_default() {
        let response = engine().evaluate(24, "sleeps well and eats everything");
        assert_eq!(response.mode, ResponseMode::OfflineSafe);
        assert_eq!(response.risk, "monitor");
        assert_eq!(response.confidence, 0.75);
        assert_eq!(
            response.summary,
            vec!["Insufficient data — clinician review recommended"]
        );
        assert!(response.rule_id.is_none());
    }

    #[test]
    fn match_is_cached_and_reused_for_age_bucket() {
        let store = Arc::new(MemoryStore::new());
        let engine = RuleEngine::new(store);

        let first = engine.evaluate(24, "only a few words, doesn't combine them");
        assert_eq!(first.rule_id, Some(RuleId::new("language_24m")));

        // Different, non-matching text at the same age hits the cached bucket.
        let second = engine.evaluate(24, "nothing notable reported");
        assert_eq!(second, first);
    }

    #[test]
    fn out_of_age_window_never_matches() {
        assert!(engine().find_match(60, "no words, not talking").is_none());
    }

    proptest! {
        /// The engine's answer is always the first rule a linear scan finds.
        #[test]
        fn precedence_matches_linear_scan(
            age in 0u32..48,
            text in prop::sample::select(vec![
                "no words and no eye contact",
                "not walking and doesn't point",
                "says 10 words, doesn't combine",
                "no pretend play, few words",
                "not crawling, no babbling",
                "perfectly typical day",
            ])
        ) {
            let engine = engine();
            let expected = builtin_rules().iter().find(|r| r.matches(age, text));
            let got = engine.find_match(age, text);
            prop_assert_eq!(expected.map(|r| r.id), got.map(|r| r.id));
        }
    }
}
