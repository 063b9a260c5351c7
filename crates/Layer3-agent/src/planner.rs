//! Planner - ParallelPlan 요청을 독립적인 SubTask 들로 분해
//!
//! Oracle 의 decomposition 응답은 그대로 믿지 않는다:
//!
//! 1. 구조가 깨졌으면 요청 전체를 하나의 SubTask 로
//! 2. 거의 같은 설명은 하나만 남김 (token Jaccard)
//! 3. 비었거나 중복된 id 는 `task_N` 으로 재할당
//! 4. `max_subtasks` 이후는 버림

use crate::plan::{Plan, PlanOutcome, SubTask, SubTaskId};
use skillforge_foundation::{Error, PlannerConfig, Request};
use skillforge_oracle::{DecompositionReply, OracleClient, ProposedSubtask};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

pub struct Planner {
    config: PlannerConfig,
    oracle: OracleClient,
}

impl Planner {
    pub fn new(config: PlannerConfig, oracle: OracleClient) -> Self {
        Self { config, oracle }
    }

    pub async fn plan(&self, request: &Request) -> PlanOutcome {
        match self.oracle.decompose(request.text()).await {
            Ok(reply) => self.validate(request, reply),
            Err(e) => {
                let err = Error::PlanningMalformed(e.to_string());
                warn!("[{}] {}; running the request as one subtask", request.id(), err);
                PlanOutcome::Plan(Plan::single(request))
            }
        }
    }

    /// Turn an oracle proposal into a Plan (pure)
    pub fn validate(&self, request: &Request, reply: DecompositionReply) -> PlanOutcome {
        if reply.subtasks.is_empty() {
            info!("[{}] Decomposition proposed no subtasks", request.id());
            return PlanOutcome::Direct;
        }

        if reply
            .subtasks
            .iter()
            .all(|s| s.description.trim().is_empty())
        {
            let err = Error::PlanningMalformed("every subtask description is empty".into());
            warn!("[{}] {}; running the request as one subtask", request.id(), err);
            return PlanOutcome::Plan(Plan::single(request));
        }

        let parallel = reply.is_parallel();
        let proposed = dedupe(reply.subtasks, self.config.dedupe_threshold);
        let mut subtasks = assign_ids(proposed);

        if subtasks.len() > self.config.max_subtasks {
            debug!(
                "[{}] Truncating {} subtasks to {}",
                request.id(),
                subtasks.len(),
                self.config.max_subtasks
            );
            subtasks.truncate(self.config.max_subtasks);
        }

        if !parallel && subtasks.len() > 1 {
            info!(
                "[{}] Oracle marked {} subtasks as dependent; running as one",
                request.id(),
                subtasks.len()
            );
            return PlanOutcome::Plan(Plan::single(request));
        }

        info!("[{}] Planned {} subtask(s)", request.id(), subtasks.len());
        PlanOutcome::Plan(Plan::new(request.id(), subtasks))
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(normalized: &str) -> BTreeSet<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

/// Token Jaccard similarity of two normalized strings
pub fn jaccard(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Drop empty descriptions and near-duplicates, keeping the first occurrence
fn dedupe(proposed: Vec<ProposedSubtask>, threshold: f64) -> Vec<ProposedSubtask> {
    let mut kept: Vec<(String, ProposedSubtask)> = Vec::new();

    for subtask in proposed {
        let normalized = normalize(&subtask.description);
        if normalized.is_empty() {
            continue;
        }
        let duplicate = kept
            .iter()
            .any(|(seen, _)| *seen == normalized || jaccard(seen, &normalized) >= threshold);
        if duplicate {
            debug!("Dropping near-duplicate subtask: {}", subtask.description);
            continue;
        }
        kept.push((normalized, subtask));
    }

    kept.into_iter().map(|(_, s)| s).collect()
}

fn assign_ids(proposed: Vec<ProposedSubtask>) -> Vec<SubTask> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(proposed.len());

    for (i, subtask) in proposed.into_iter().enumerate() {
        let id = match subtask.id_text() {
            Some(id) if used.insert(id.clone()) => SubTaskId::new(id),
            _ => {
                let mut n = i + 1;
                while used.contains(SubTaskId::numbered(n).as_str()) {
                    n += 1;
                }
                let id = SubTaskId::numbered(n);
                used.insert(id.as_str().to_string());
                id
            }
        };
        let hint = subtask.code_hint.filter(|h| !h.trim().is_empty());
        out.push(SubTask::new(id, subtask.description.trim()).with_code_hint(hint));
    }

    out
}
