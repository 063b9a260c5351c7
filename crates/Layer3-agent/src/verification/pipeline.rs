//! Verification state machine
//!
//! [`next`] 는 순수 전이 함수이고 [`VerificationPipeline::verify`] 가 단계를 실행한다.
//! Refine 횟수는 파이프라인 전체에서 하나의 카운터를 공유한다.

use super::lint::{lint_feedback, LintPolicy};
use super::VerificationCandidate;
use serde::Serialize;
use skillforge_foundation::{Error, Result, VerificationConfig};
use skillforge_oracle::{DocumentationRequest, OracleClient};
use skillforge_sandbox::{resolve_dependencies, ResourceLimits, SandboxInvocation, SandboxRuntime};
use skillforge_skill::{slugify, validate_skill_name, Skill, SkillDocument, SkillIndex, UpsertOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lint,
    Test,
    Refine,
    Document,
    Save,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Lint => "lint",
            Stage::Test => "test",
            Stage::Refine => "refine",
            Stage::Document => "document",
            Stage::Save => "save",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(Stage),
    Saved,
    Discarded,
}

/// Transition after `stage` reports `event`
///
/// `refine_cycles` counts the Refine stages already entered.
pub fn next(stage: Stage, event: StageEvent, refine_cycles: u32, max_refine_cycles: u32) -> Next {
    let refine_or_discard = if refine_cycles < max_refine_cycles {
        Next::Stage(Stage::Refine)
    } else {
        Next::Discarded
    };

    match (stage, event) {
        (Stage::Lint, StageEvent::Passed) => Next::Stage(Stage::Test),
        (Stage::Test, StageEvent::Passed) => Next::Stage(Stage::Document),
        (Stage::Refine, StageEvent::Passed) => Next::Stage(Stage::Lint),
        (Stage::Document, StageEvent::Passed) => Next::Stage(Stage::Save),
        (Stage::Save, StageEvent::Passed) => Next::Saved,
        (Stage::Lint | Stage::Test | Stage::Refine, StageEvent::Failed) => refine_or_discard,
        (Stage::Document | Stage::Save, StageEvent::Failed) => Next::Discarded,
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Saved { name: String, replaced: bool },
    Discarded { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub description: String,
    pub outcome: VerificationOutcome,
    pub refine_cycles: u32,
    /// Every stage entered, in order
    pub transitions: Vec<Stage>,
}

impl VerificationReport {
    pub fn is_saved(&self) -> bool {
        matches!(self.outcome, VerificationOutcome::Saved { .. })
    }
}

// ============================================================================
// VerificationPipeline
// ============================================================================

pub struct VerificationPipeline {
    oracle: OracleClient,
    sandbox: Arc<dyn SandboxRuntime>,
    index: Arc<dyn SkillIndex>,
    lint: LintPolicy,
    config: VerificationConfig,
    limits: ResourceLimits,
    workspace: Option<PathBuf>,
}

/// Mutable state of one run
struct Work {
    code: String,
    dependencies: Vec<String>,
    /// Latest Lint / Test failure, handed to Refine
    feedback: String,
    /// Latest failure of any stage, reported on discard
    reason: String,
    skill: Option<Skill>,
    saved: Option<(String, bool)>,
}

impl VerificationPipeline {
    pub fn new(
        oracle: OracleClient,
        sandbox: Arc<dyn SandboxRuntime>,
        index: Arc<dyn SkillIndex>,
        config: VerificationConfig,
    ) -> Self {
        let lint = LintPolicy::with_allowed_roots(config.allowed_write_roots.clone());
        Self {
            oracle,
            sandbox,
            index,
            lint,
            config,
            limits: ResourceLimits::default(),
            workspace: None,
        }
    }

    pub fn with_lint_policy(mut self, lint: LintPolicy) -> Self {
        self.lint = lint;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_workspace(mut self, workspace: Option<PathBuf>) -> Self {
        self.workspace = workspace;
        self
    }

    pub async fn verify(&self, candidate: VerificationCandidate) -> VerificationReport {
        let max = self.config.max_refine_cycles;
        let mut work = Work {
            code: candidate.code.clone(),
            dependencies: candidate.dependencies.clone(),
            feedback: String::new(),
            reason: String::new(),
            skill: None,
            saved: None,
        };
        let mut stage = Stage::Lint;
        let mut refine_cycles = 0;
        let mut transitions = vec![Stage::Lint];

        loop {
            let event = match self.run_stage(stage, &candidate, &mut work).await {
                Ok(()) => StageEvent::Passed,
                Err(reason) => {
                    debug!("Verification {} failed: {}", stage, reason);
                    // a failed Refine call must not hide what needs fixing
                    if matches!(stage, Stage::Lint | Stage::Test) {
                        work.feedback = reason.clone();
                    }
                    work.reason = reason;
                    StageEvent::Failed
                }
            };

            let outcome = match next(stage, event, refine_cycles, max) {
                Next::Stage(to) => {
                    if to == Stage::Refine {
                        refine_cycles += 1;
                    }
                    debug!("Verification {} -> {}", stage, to);
                    transitions.push(to);
                    stage = to;
                    continue;
                }
                Next::Saved => {
                    let (name, replaced) = work.saved.take().unwrap_or_default();
                    info!(
                        "Saved skill '{}' ({})",
                        name,
                        if replaced { "replaced" } else { "new" }
                    );
                    VerificationOutcome::Saved { name, replaced }
                }
                Next::Discarded => {
                    let err = Error::VerificationRejected(format!(
                        "{} at {}: {}",
                        candidate.description, stage, work.reason
                    ));
                    warn!("{}", err);
                    VerificationOutcome::Discarded {
                        stage,
                        reason: work.reason.clone(),
                    }
                }
            };

            return VerificationReport {
                description: candidate.description,
                outcome,
                refine_cycles,
                transitions,
            };
        }
    }

    /// `Err` carries the feedback for Refine or the discard reason
    async fn run_stage(
        &self,
        stage: Stage,
        candidate: &VerificationCandidate,
        work: &mut Work,
    ) -> std::result::Result<(), String> {
        match stage {
            Stage::Lint => {
                let violations = self.lint.check(&work.code);
                if violations.is_empty() {
                    Ok(())
                } else {
                    Err(lint_feedback(&violations))
                }
            }
            Stage::Test => self.test(candidate, work).await,
            Stage::Refine => {
                let code = self
                    .oracle
                    .refine_code(&candidate.description, &work.code, &work.feedback)
                    .await
                    .map_err(|e| e.to_string())?;
                work.dependencies = resolve_dependencies(&code, &[])
                    .into_iter()
                    .map(|d| d.package)
                    .collect();
                work.code = code;
                Ok(())
            }
            Stage::Document => {
                let skill = self
                    .document(candidate, &work.code, &work.dependencies)
                    .await
                    .map_err(|e| e.to_string())?;
                work.skill = Some(skill);
                Ok(())
            }
            Stage::Save => {
                let skill = work
                    .skill
                    .take()
                    .ok_or_else(|| "no documented skill to save".to_string())?;
                let name = skill.name.clone();
                let outcome = self.index.upsert(skill).await.map_err(|e| e.to_string())?;
                work.saved = Some((name, outcome == UpsertOutcome::Replaced));
                Ok(())
            }
        }
    }

    async fn test(&self, candidate: &VerificationCandidate, work: &Work) -> std::result::Result<(), String> {
        let invocation = SandboxInvocation::new(work.code.clone())
            .with_dependencies(work.dependencies.clone())
            .with_limits(self.limits)
            .with_workspace(self.workspace.clone());

        let output = self
            .sandbox
            .run(invocation, CancellationToken::new())
            .await
            .map_err(|e| e.to_string())?;

        if let Some(err) = output.error(&self.limits) {
            return Err(format!("The code failed when re-run:\n{}", err));
        }

        if self.config.require_deterministic_output
            && output.stdout.trim_end() != candidate.original_stdout.trim_end()
        {
            return Err(format!(
                "The output changed between runs.\nFirst run:\n{}\nSecond run:\n{}\n\
                 Make the output deterministic.",
                candidate.original_stdout.trim_end(),
                output.stdout.trim_end()
            ));
        }

        Ok(())
    }

    /// Documentation reply → Skill, with the name and code fixed up
    async fn document(
        &self,
        candidate: &VerificationCandidate,
        code: &str,
        dependencies: &[String],
    ) -> Result<Skill> {
        let reused = match self.index.find_identical(code, &candidate.description).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Duplicate lookup failed: {}", e);
                None
            }
        };

        let reply = self
            .oracle
            .document_skill(&DocumentationRequest {
                description: candidate.description.clone(),
                code: code.to_string(),
                dependencies: dependencies.to_vec(),
                suggested_name: reused.clone(),
            })
            .await?;

        let mut doc = SkillDocument::parse(&reply)?;
        let proposed = doc.frontmatter.name.trim().to_string();

        doc.frontmatter.name = match reused {
            Some(name) => {
                debug!("Reusing name '{}' for identical skill", name);
                name
            }
            None if validate_skill_name(&proposed).is_ok() => proposed,
            None => {
                let slug = slugify(&candidate.description);
                debug!("Proposed name '{}' is not kebab-case, using '{}'", proposed, slug);
                slug
            }
        };
        // the task description is the retrieval and dedupe key
        doc.frontmatter.description = candidate.description.clone();
        if doc.frontmatter.dependencies.is_empty() {
            doc.frontmatter.dependencies = dependencies.to_vec();
        }
        doc.fill_missing_sections();
        doc.set_code(code);

        Skill::from_document(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SubTaskId;
    use skillforge_oracle::{CallSite, RetryConfig, ScriptedOracle};
    use skillforge_sandbox::{ScriptedRun, ScriptedSandbox};
    use skillforge_skill::InMemorySkillIndex;

    const DOC: &str = "---\nname: calculate-pi\ndescription: Calculate pi\nversion: 1.0.0\n---\n\
                       # Calculate Pi\n\n## Description\n\nPrints pi.\n\n## Code\n\n```python\nprint(3)\n```\n";

    #[test]
    fn test_happy_transitions() {
        assert_eq!(next(Stage::Lint, StageEvent::Passed, 0, 3), Next::Stage(Stage::Test));
        assert_eq!(next(Stage::Test, StageEvent::Passed, 0, 3), Next::Stage(Stage::Document));
        assert_eq!(next(Stage::Document, StageEvent::Passed, 0, 3), Next::Stage(Stage::Save));
        assert_eq!(next(Stage::Save, StageEvent::Passed, 0, 3), Next::Saved);
    }

    #[test]
    fn test_failures_refine_until_budget() {
        assert_eq!(next(Stage::Lint, StageEvent::Failed, 0, 3), Next::Stage(Stage::Refine));
        assert_eq!(next(Stage::Test, StageEvent::Failed, 2, 3), Next::Stage(Stage::Refine));
        assert_eq!(next(Stage::Lint, StageEvent::Failed, 3, 3), Next::Discarded);
        assert_eq!(next(Stage::Refine, StageEvent::Passed, 3, 3), Next::Stage(Stage::Lint));
        assert_eq!(next(Stage::Refine, StageEvent::Failed, 1, 3), Next::Stage(Stage::Refine));
        assert_eq!(next(Stage::Refine, StageEvent::Failed, 3, 3), Next::Discarded);
    }

    #[test]
    fn test_document_and_save_failures_discard() {
        assert_eq!(next(Stage::Document, StageEvent::Failed, 0, 3), Next::Discarded);
        assert_eq!(next(Stage::Save, StageEvent::Failed, 0, 3), Next::Discarded);
    }

    fn candidate(code: &str) -> VerificationCandidate {
        VerificationCandidate {
            subtask_id: SubTaskId::numbered(1),
            description: "Calculate pi".into(),
            code: code.into(),
            dependencies: Vec::new(),
            original_output: "3".into(),
            original_stdout: "3\n".into(),
        }
    }

    fn pipeline(
        oracle: ScriptedOracle,
        sandbox: ScriptedSandbox,
        index: Arc<InMemorySkillIndex>,
        config: VerificationConfig,
    ) -> VerificationPipeline {
        let client = OracleClient::new(Arc::new(oracle))
            .with_retry(RetryConfig::no_retry())
            .with_malformed_retries(0);
        VerificationPipeline::new(client, Arc::new(sandbox), index, config)
    }

    #[tokio::test]
    async fn test_clean_code_is_saved() {
        let index = Arc::new(InMemorySkillIndex::default());
        let oracle = ScriptedOracle::new().with_reply(CallSite::Documentation, DOC);
        let report = pipeline(oracle, ScriptedSandbox::new(), index.clone(), VerificationConfig::default())
            .verify(candidate("print(3)"))
            .await;

        assert_eq!(
            report.outcome,
            VerificationOutcome::Saved {
                name: "calculate-pi".into(),
                replaced: false
            }
        );
        assert_eq!(
            report.transitions,
            vec![Stage::Lint, Stage::Test, Stage::Document, Stage::Save]
        );
        let saved = index.get("calculate-pi").await.unwrap().unwrap();
        assert_eq!(saved.code, "print(3)");
        assert!(saved.documentation.contains("## Troubleshooting"));
    }

    #[tokio::test]
    async fn test_lint_failure_refined() {
        let index = Arc::new(InMemorySkillIndex::default());
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeRepair, "```python\nprint(3)\n```")
            .with_reply(CallSite::Documentation, DOC);
        let report = pipeline(oracle, ScriptedSandbox::new(), index, VerificationConfig::default())
            .verify(candidate("import os\nos.system('echo 3')"))
            .await;

        assert!(report.is_saved());
        assert_eq!(report.refine_cycles, 1);
        assert_eq!(&report.transitions[..3], &[Stage::Lint, Stage::Refine, Stage::Lint]);
    }

    #[tokio::test]
    async fn test_persistent_violation_discarded() {
        let index = Arc::new(InMemorySkillIndex::default());
        let bad = "open('/etc/motd', 'w').write('x')";
        let oracle = ScriptedOracle::new()
            .with_default(CallSite::CodeRepair, format!("```python\n{}\n```", bad));
        let report = pipeline(oracle, ScriptedSandbox::new(), index.clone(), VerificationConfig::default())
            .verify(candidate(bad))
            .await;

        match &report.outcome {
            VerificationOutcome::Discarded { stage, reason } => {
                assert_eq!(*stage, Stage::Lint);
                assert!(reason.contains("write_outside_sandbox"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.refine_cycles, 3);
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_refine_after_malformed_reply_keeps_lint_feedback() {
        let index = Arc::new(InMemorySkillIndex::default());
        let bad = "import os\nos.system('echo 3')";
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_reply(CallSite::CodeRepair, "no code here, sorry")
                .with_reply(CallSite::CodeRepair, format!("```python\n{}\n```", bad))
                .with_reply(CallSite::CodeRepair, "```python\nprint(3)\n```")
                .with_reply(CallSite::Documentation, DOC),
        );
        let client = OracleClient::new(oracle.clone())
            .with_retry(RetryConfig::no_retry())
            .with_malformed_retries(0);
        let report = VerificationPipeline::new(
            client,
            Arc::new(ScriptedSandbox::new()),
            index,
            VerificationConfig::default(),
        )
        .verify(candidate(bad))
        .await;

        assert!(report.is_saved());
        assert_eq!(report.refine_cycles, 3);
        let refines: Vec<String> = oracle
            .calls()
            .into_iter()
            .filter(|r| r.call_site == CallSite::CodeRepair)
            .map(|r| r.prompt)
            .collect();
        assert_eq!(refines.len(), 3);
        for prompt in &refines {
            let feedback = prompt.split("VERIFICATION FEEDBACK:").nth(1).unwrap_or_default();
            assert!(feedback.contains("os.system"), "{feedback}");
            assert!(!feedback.contains("no code"), "{feedback}");
        }
    }

    #[tokio::test]
    async fn test_nondeterministic_output_refined_when_required() {
        let index = Arc::new(InMemorySkillIndex::default());
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeRepair, "```python\nprint(3)  # fixed\n```")
            .with_reply(CallSite::Documentation, DOC);
        let sandbox = ScriptedSandbox::new()
            .when("random", ScriptedRun::ok("7\n"))
            .otherwise(ScriptedRun::ok("3\n"));
        let config = VerificationConfig {
            require_deterministic_output: true,
            ..Default::default()
        };
        let report = pipeline(oracle, sandbox, index, config)
            .verify(candidate("import random\nprint(random.randint(0, 9))"))
            .await;

        assert!(report.is_saved());
        assert_eq!(&report.transitions[..3], &[Stage::Lint, Stage::Test, Stage::Refine]);
    }

    #[tokio::test]
    async fn test_malformed_document_discarded() {
        let index = Arc::new(InMemorySkillIndex::default());
        let oracle = ScriptedOracle::new().with_reply(CallSite::Documentation, "Here is some prose.");
        let report = pipeline(oracle, ScriptedSandbox::new(), index.clone(), VerificationConfig::default())
            .verify(candidate("print(3)"))
            .await;

        assert!(matches!(
            report.outcome,
            VerificationOutcome::Discarded { stage: Stage::Document, .. }
        ));
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_name_is_slugified_and_identical_reused() {
        let index = Arc::new(InMemorySkillIndex::default());
        let doc = DOC.replace("name: calculate-pi", "name: Calculate Pi!");
        let oracle = ScriptedOracle::new().with_default(CallSite::Documentation, doc);
        let pipeline = pipeline(oracle, ScriptedSandbox::new(), index.clone(), VerificationConfig::default());

        let first = pipeline.verify(candidate("print(3)")).await;
        assert_eq!(
            first.outcome,
            VerificationOutcome::Saved {
                name: "calculate-pi".into(),
                replaced: false
            }
        );

        let second = pipeline.verify(candidate("print(3)")).await;
        assert_eq!(
            second.outcome,
            VerificationOutcome::Saved {
                name: "calculate-pi".into(),
                replaced: true
            }
        );
        assert_eq!(index.len().await.unwrap(), 1);
    }
}
