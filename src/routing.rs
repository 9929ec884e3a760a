//! Smart router: classifies free-text observations into a priority tier and
//! selects the pipeline stages required to process them.
//!
//! Emergency detection is checked before anything else and short-circuits
//! straight to the safety pipeline; it must never wait on domain scoring.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{Priority, StageId};

/// Case-insensitive substring match against any of these short-circuits
/// routing entirely.
pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "emergency",
    "seizure",
    "unresponsive",
    "breathing",
    "choking",
    "not breathing",
];

pub const FULL_PIPELINE: &[StageId] = &[
    StageId::Intake,
    StageId::Embedding,
    StageId::Temporal,
    StageId::Inference,
    StageId::Safety,
    StageId::Summarizer,
];

pub const SHORT_PIPELINE: &[StageId] = &[StageId::Intake, StageId::Inference, StageId::Safety];

pub const EMERGENCY_PIPELINE: &[StageId] = &[StageId::Intake, StageId::Safety];

// Heuristic constants, not derived scores. Kept fixed on purpose.
const ROUTE_CONFIDENCE: f64 = 0.92;
const EMERGENCY_CONFIDENCE: f64 = 0.98;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub primary_agent: StageId,
    pub full_pipeline: Vec<StageId>,
    pub priority: Priority,
    pub confidence: f64,
    pub rationale: String,
}

struct DomainPatterns {
    name: &'static str,
    patterns: Vec<Regex>,
}

pub struct SmartRouter {
    domains: Vec<DomainPatterns>,
}

impl Default for SmartRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartRouter {
    pub fn new() -> Self {
        let compile = |exprs: &[&str]| -> Vec<Regex> {
            exprs
                .iter()
                .map(|e| Regex::new(e).expect("static domain pattern"))
                .collect()
        };

        Self {
            domains: vec![
                DomainPatterns {
                    name: "language",
                    patterns: compile(&[
                        r"\bwords?\b",
                        r"\btalk(?:s|ing)?\b",
                        r"\bspeech\b",
                        r"\bbabbl\w*",
                        r"\bvocabulary\b",
                        r"\bsentences?\b",
                    ]),
                },
                DomainPatterns {
                    name: "motor",
                    patterns: compile(&[
                        r"\bwalk(?:s|ing)?\b",
                        r"\bcrawl(?:s|ing)?\b",
                        r"\bsit(?:s|ting)?\b",
                        r"\bgrasp\w*",
                        r"\bclimb\w*",
                        r"\bbalance\b",
                    ]),
                },
                DomainPatterns {
                    name: "social",
                    patterns: compile(&[
                        r"\beye contact\b",
                        r"\bpoint(?:s|ing)?\b",
                        r"\bsmile(?:s|d)?\b",
                        r"\bplay(?:s|ing)?\b",
                        r"\brespond\w*",
                        r"\bname\b",
                    ]),
                },
                DomainPatterns {
                    name: "cognitive",
                    patterns: compile(&[
                        r"\bpretend\w*",
                        r"\bsort(?:s|ing)?\b",
                        r"\bstack(?:s|ing)?\b",
                        r"\bpuzzles?\b",
                        r"\bproblem.?solv\w*",
                        r"\bimitat\w*",
                    ]),
                },
            ],
        }
    }

    /// Always returns a decision; never errors.
    pub fn route(&self, text: &str, age_months: u32) -> RouteDecision {
        let lower = text.to_lowercase();

        if EMERGENCY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return RouteDecision {
                primary_agent: StageId::Intake,
                full_pipeline: EMERGENCY_PIPELINE.to_vec(),
                priority: Priority::Urgent,
                confidence: EMERGENCY_CONFIDENCE,
                rationale: "emergency keyword detected; routing to safety pipeline".to_string(),
            };
        }

        // Domain scoring picks the dominant domain for the rationale only;
        // stage selection is binary on "any domain signal at all".
        let mut total_matches = 0usize;
        let mut best: (&'static str, f64, usize) = ("none", 0.0, 0);
        for domain in &self.domains {
            let matches: usize = domain
                .patterns
                .iter()
                .map(|re| re.find_iter(&lower).count())
                .sum();
            total_matches += matches;
            let ratio = matches as f64 / domain.patterns.len() as f64;
            if ratio > best.1 {
                best = (domain.name, ratio, matches);
            }
        }

        let priority = analyze_priority(&lower);

        if total_matches > 0 {
            RouteDecision {
                primary_agent: StageId::Intake,
                full_pipeline: FULL_PIPELINE.to_vec(),
                priority,
                confidence: ROUTE_CONFIDENCE,
                rationale: format!(
                    "dominant domain {} ({} matches) at {age_months}m; full pipeline",
                    best.0, best.2
                ),
            }
        } else {
            RouteDecision {
                primary_agent: StageId::Intake,
                full_pipeline: SHORT_PIPELINE.to_vec(),
                priority,
                confidence: ROUTE_CONFIDENCE,
                rationale: format!("no domain signal at {age_months}m; minimal pipeline"),
            }
        }
    }
}

/// Severity keyword heuristic, independent of domain scoring.
fn analyze_priority(lower: &str) -> Priority {
    const HIGH: &[&str] = &["regression", "lost skills", "stopped", "worsening", "severe"];
    const MEDIUM: &[&str] = &["worried", "concern", "delay", "behind", "struggles"];

    if HIGH.iter().any(|k| lower.contains(k)) {
        Priority::High
    } else if MEDIUM.iter().any(|k| lower.contains(k)) {
        Priority::Medium
    } else {
        Priority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_short_circuits() {
        let router = SmartRouter::new();
        let decision = router.route("emergency, child is not breathing", 30);
        assert_eq!(decision.priority, Priority::Urgent);
        assert_eq!(decision.full_pipeline, vec![StageId::Intake, StageId::Safety]);
        assert_eq!(decision.confidence, 0.98);
        assert_eq!(decision.primary_agent, StageId::Intake);
    }

    #[test]
    fn emergency_is_case_insensitive_and_beats_domain_keywords() {
        let router = SmartRouter::new();
        let decision = router.route("SEIZURE while playing, says many words", 18);
        assert_eq!(decision.priority, Priority::Urgent);
        assert_eq!(decision.full_pipeline, EMERGENCY_PIPELINE.to_vec());
    }

    #[test]
    fn domain_signal_selects_full_pipeline() {
        let router = SmartRouter::new();
        let decision = router.route("only says a few words and isn't talking in sentences", 24);
        assert_eq!(decision.full_pipeline, FULL_PIPELINE.to_vec());
        assert_eq!(decision.confidence, 0.92);
        assert!(decision.rationale.contains("language"));
    }

    #[test]
    fn no_signal_selects_short_pipeline() {
        let router = SmartRouter::new();
        let decision = router.route("generally doing fine, nothing specific", 24);
        assert_eq!(
            decision.full_pipeline,
            vec![StageId::Intake, StageId::Inference, StageId::Safety]
        );
        assert_eq!(decision.priority, Priority::Low);
    }

    #[test]
    fn priority_analyzer_tiers() {
        assert_eq!(analyze_priority("sudden regression in speech"), Priority::High);
        assert_eq!(analyze_priority("we are worried about a delay"), Priority::Medium);
        assert_eq!(analyze_priority("all good"), Priority::Low);
    }

    #[test]
    fn priority_is_independent_of_pipeline_choice() {
        let router = SmartRouter::new();
        // High severity wording without any domain keyword: short pipeline,
        // high priority.
        let decision = router.route("severe change since last month", 24);
        assert_eq!(decision.priority, Priority::High);
        assert_eq!(decision.full_pipeline, SHORT_PIPELINE.to_vec());
    }
}
