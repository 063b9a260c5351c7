//! Router - 요청을 Direct / SequentialTask / ParallelPlan 으로 분류
//!
//! `route` 는 순수 함수다. 규칙:
//!
//! ```text
//! conjunctions (and, plus, also, as well as, &) + separators (, ;)
//!     >= parallel_signal_threshold   → ParallelPlan
//! actionable intent keyword           → SequentialTask
//! otherwise                           → Direct (ambiguous unless conversational)
//! ```
//!
//! 애매한 Direct 결정만 `resolve` 에서 oracle 에 다시 묻는다.

use regex::Regex;
use serde::Serialize;
use skillforge_foundation::{Error, Request, RouterConfig};
use skillforge_oracle::{Intent, OracleClient};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Verbs that indicate something should be executed
const INTENT_KEYWORDS: &[&str] = &[
    "create", "generate", "calculate", "compute", "fetch", "download", "plot", "convert",
    "analyze", "analyse", "sort", "count", "find", "search", "list", "write", "run", "simulate",
    "scrape", "summarize", "summarise", "draw", "make", "build", "get", "extract", "parse",
    "solve", "render", "visualize", "chart", "graph", "save", "load", "read",
];

fn conjunction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bas\s+well\s+as\b|\b(?:and|plus|also)\b|&")
            .expect("conjunction pattern is a valid regex")
    })
}

fn conversational_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:hi|hello|hey|yo|hiya|greetings|good\s+(?:morning|afternoon|evening))\b|\bthanks?\b|\bthank\s+you\b|\bwho\s+are\s+you\b|\bwhat\s+(?:are|can)\s+you\b|\byour\s+name\b|\bhow\s+are\s+you\b",
        )
        .expect("conversational pattern is a valid regex")
    })
}

// ============================================================================
// RoutingDecision
// ============================================================================

/// Evidence behind a routing decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingSignal {
    pub conjunctions: usize,
    pub separators: usize,
    pub intent_keyword: Option<String>,
    pub ambiguous: bool,
    pub oracle_resolved: bool,
}

impl RoutingSignal {
    pub fn parallel_signals(&self) -> usize {
        self.conjunctions + self.separators
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "signal", rename_all = "snake_case")]
pub enum RoutingDecision {
    Direct(RoutingSignal),
    SequentialTask(RoutingSignal),
    ParallelPlan(RoutingSignal),
}

impl RoutingDecision {
    pub fn signal(&self) -> &RoutingSignal {
        match self {
            RoutingDecision::Direct(s)
            | RoutingDecision::SequentialTask(s)
            | RoutingDecision::ParallelPlan(s) => s,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoutingDecision::Direct(_) => "direct",
            RoutingDecision::SequentialTask(_) => "sequential_task",
            RoutingDecision::ParallelPlan(_) => "parallel_plan",
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.signal().ambiguous
    }
}

// ============================================================================
// Router
// ============================================================================

pub struct Router {
    config: RouterConfig,
    oracle: Option<OracleClient>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            oracle: None,
        }
    }

    pub fn with_oracle(mut self, oracle: OracleClient) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Deterministic routing
    pub fn route(&self, text: &str) -> RoutingDecision {
        let conjunctions = count_conjunctions(text);
        let separators = count_separators(text);
        let intent_keyword = find_intent_keyword(text);

        let mut signal = RoutingSignal {
            conjunctions,
            separators,
            intent_keyword,
            ambiguous: false,
            oracle_resolved: false,
        };

        let decision = if signal.parallel_signals() >= self.config.parallel_signal_threshold {
            RoutingDecision::ParallelPlan(signal)
        } else if signal.intent_keyword.is_some() {
            RoutingDecision::SequentialTask(signal)
        } else {
            signal.ambiguous = !conversational_re().is_match(text);
            RoutingDecision::Direct(signal)
        };

        debug!(
            "Routed to {} (conjunctions={}, separators={}, keyword={:?}, ambiguous={})",
            decision.name(),
            decision.signal().conjunctions,
            decision.signal().separators,
            decision.signal().intent_keyword,
            decision.signal().ambiguous
        );
        decision
    }

    /// `route`, then ask the oracle about ambiguous decisions
    pub async fn resolve(&self, request: &Request) -> RoutingDecision {
        let decision = self.route(request.text());
        if !decision.is_ambiguous() || !self.config.consult_oracle {
            return decision;
        }
        let Some(oracle) = &self.oracle else {
            return decision;
        };

        let mut signal = decision.signal().clone();
        let resolved = match oracle.classify_intent(request.text()).await {
            Ok(Intent::Direct) => {
                signal.oracle_resolved = true;
                RoutingDecision::Direct(signal)
            }
            Ok(Intent::Task) => {
                signal.oracle_resolved = true;
                RoutingDecision::SequentialTask(signal)
            }
            Err(e) => {
                let err = Error::RoutingAmbiguity(e.to_string());
                warn!("[{}] {}; defaulting to a sequential task", request.id(), err);
                RoutingDecision::SequentialTask(signal)
            }
        };

        info!("[{}] Oracle resolved routing: {}", request.id(), resolved.name());
        resolved
    }
}

// ============================================================================
// Signals
// ============================================================================

pub fn count_conjunctions(text: &str) -> usize {
    conjunction_re().find_iter(text).count()
}

/// `,` and `;` that separate items (not trailing, not inside numbers like `1,000`)
pub fn count_separators(text: &str) -> usize {
    let trimmed = text.trim_end().trim_end_matches([',', ';', '.', '!', '?', ' ']);
    let chars: Vec<char> = trimmed.chars().collect();

    chars
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            if **c == ';' {
                return true;
            }
            if **c != ',' {
                return false;
            }
            let before = i.checked_sub(1).and_then(|j| chars.get(j));
            let after = chars.get(i + 1);
            !matches!((before, after), (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit())
        })
        .count()
}

fn keyword_matches(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    let Some(rest) = token.strip_prefix(keyword) else {
        // create → creating, compute → computing
        return keyword
            .strip_suffix('e')
            .and_then(|stem| token.strip_prefix(stem))
            .is_some_and(|rest| rest == "ing" || rest == "ed");
    };
    matches!(rest, "s" | "es" | "d" | "ed" | "ing")
        // run → running, plot → plotting
        || keyword
            .chars()
            .last()
            .is_some_and(|last| rest.len() == 4 && rest.starts_with(last) && rest.ends_with("ing"))
}

/// First actionable verb in the text, as its base form
pub fn find_intent_keyword(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .find_map(|token| {
            INTENT_KEYWORDS
                .iter()
                .find(|kw| keyword_matches(token, kw))
                .map(|kw| kw.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillforge_oracle::{CallSite, RetryConfig, ScriptedOracle};
    use std::sync::Arc;

    fn router() -> Router {
        Router::new(RouterConfig::default())
    }

    #[test]
    fn test_two_conjunctions_go_parallel() {
        let decision = router().route("create table and generate primes and calculate pi");
        assert!(matches!(decision, RoutingDecision::ParallelPlan(_)));
        assert_eq!(decision.signal().conjunctions, 2);
    }

    #[test]
    fn test_conjunctions_without_intent_still_parallel() {
        let decision = router().route("bitcoin and ethereum and dogecoin");
        assert!(matches!(decision, RoutingDecision::ParallelPlan(_)));
        assert!(decision.signal().intent_keyword.is_none());
    }

    #[test]
    fn test_conjunction_plus_separator() {
        let decision = router().route("plot sin, cos as well as tan");
        assert_eq!(decision.signal().conjunctions, 1);
        assert_eq!(decision.signal().separators, 1);
        assert!(matches!(decision, RoutingDecision::ParallelPlan(_)));
    }

    #[test]
    fn test_whole_words_only() {
        assert_eq!(count_conjunctions("android brand candy"), 0);
        assert_eq!(count_conjunctions("salt & pepper AND"), 2);
    }

    #[test]
    fn test_trailing_and_numeric_separators_ignored() {
        assert_eq!(count_separators("sum 1,000 numbers,"), 0);
        assert_eq!(count_separators("a; b, c;"), 2);
    }

    #[test]
    fn test_single_intent_is_sequential() {
        let decision = router().route("Calculate the first 20 primes");
        assert!(matches!(decision, RoutingDecision::SequentialTask(_)));
        assert_eq!(decision.signal().intent_keyword.as_deref(), Some("calculate"));
        assert!(!decision.is_ambiguous());
    }

    #[test]
    fn test_keyword_inflections() {
        assert_eq!(find_intent_keyword("plotting data").as_deref(), Some("plot"));
        assert_eq!(find_intent_keyword("running it").as_deref(), Some("run"));
        assert_eq!(find_intent_keyword("creating files").as_deref(), Some("create"));
        assert_eq!(find_intent_keyword("country music"), None);
    }

    #[test]
    fn test_direct_ambiguity() {
        let greeting = router().route("Hello there!");
        assert!(matches!(greeting, RoutingDecision::Direct(_)));
        assert!(!greeting.is_ambiguous());

        let unclear = router().route("bitcoin price");
        assert!(matches!(unclear, RoutingDecision::Direct(_)));
        assert!(unclear.is_ambiguous());
    }

    #[tokio::test]
    async fn test_resolve_asks_oracle_for_ambiguous() {
        let oracle = Arc::new(ScriptedOracle::new().with_reply(CallSite::Routing, r#"{"intent": "task"}"#));
        let router = router().with_oracle(OracleClient::new(oracle.clone()).with_retry(RetryConfig::no_retry()));

        let decision = router.resolve(&Request::new("bitcoin price")).await;
        assert!(matches!(decision, RoutingDecision::SequentialTask(_)));
        assert!(decision.signal().oracle_resolved);

        // unambiguous decisions never reach the oracle
        router.resolve(&Request::new("hi")).await;
        assert_eq!(oracle.calls_for(CallSite::Routing), 1);
    }

    #[tokio::test]
    async fn test_resolve_oracle_failure_defaults_to_task() {
        let oracle = Arc::new(ScriptedOracle::new());
        let router = router().with_oracle(
            OracleClient::new(oracle)
                .with_retry(RetryConfig::no_retry())
                .with_malformed_retries(0),
        );
        let decision = router.resolve(&Request::new("bitcoin price")).await;
        assert!(matches!(decision, RoutingDecision::SequentialTask(_)));
        assert!(!decision.signal().oracle_resolved);
    }
}
