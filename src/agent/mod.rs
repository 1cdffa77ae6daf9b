//! Main agent - implements the reasoning/action loop
//!
//! START → SELECT → EXECUTE → OBSERVE → DECIDE → (SELECT | TERMINAL)
//!
//! The initial transaction fetch happens in START and does not count as a
//! cycle. Every later capability invocation does, and the loop stops at the
//! configured ceiling (never more than four) even if the backend wants more.

use crate::backend::{Decision, DecisionContext, GeminiBackend, ReasoningBackend, RuleBasedBackend};
use crate::config::AgentConfig;
use crate::error::{AgentError, RunFailure};
use crate::execution::CapabilityExecutor;
use crate::models::{AnalysisReport, BillingPeriod, RunEvent, UserProfile};
use crate::provider::provider_from_env;
use crate::report;
use crate::research::search_from_env;
use crate::state::AgentRun;
use crate::tools::{catalog, Capability, CapabilityCall};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordinates one backend and one executor across any number of runs.
/// Each run gets its own `AgentRun`; nothing is shared between runs.
pub struct BudgetAgent {
    backend: Arc<dyn ReasoningBackend>,
    executor: CapabilityExecutor,
    config: AgentConfig,
}

impl BudgetAgent {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        executor: CapabilityExecutor,
        config: AgentConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run one analysis to completion, failure, or cancellation.
    pub async fn run(
        &self,
        profile: &UserProfile,
        period: BillingPeriod,
        observer: Option<UnboundedSender<RunEvent>>,
        cancel: CancellationToken,
    ) -> std::result::Result<AnalysisReport, RunFailure> {
        let mut run = AgentRun::new(profile, period);
        if let Some(observer) = observer {
            run = run.with_observer(observer);
        }

        if let Err(e) = profile.validate() {
            return Err(self.fail(run, e));
        }

        info!(
            run_id = %run.run_id,
            profile = %profile.name,
            period = %run.period,
            backend = self.backend.name(),
            max_cycles = self.config.max_cycles,
            "Agent: starting run"
        );

        // === START ===
        run.log.reasoning(format!(
            "Starting budget analysis for {} over {}; transactions come first.",
            profile.name, run.period
        ));
        let initial_fetch = CapabilityCall::new(Capability::FetchTransactions, "initial fetch");
        if let Err(e) = self.execute_step(&mut run, &initial_fetch).await {
            return Err(self.fail(run, e));
        }

        let mut backend_summary = None;

        loop {
            // === DECIDE ===
            if cancel.is_cancelled() {
                warn!(run_id = %run.run_id, cycles = run.cycles_used, "Run cancelled");
                return Err(self.fail(run, AgentError::Cancelled));
            }

            if run.cycles_used >= self.config.max_cycles {
                info!(run_id = %run.run_id, cycles = run.cycles_used, "Cycle ceiling reached");
                run.log.reasoning(format!(
                    "Cycle limit of {} reached; assembling the report from what is known.",
                    self.config.max_cycles
                ));
                break;
            }

            // === SELECT ===
            let offered = catalog(&run.snapshot());
            let decision = {
                let ctx = DecisionContext {
                    run_id: run.run_id,
                    cycle: run.cycles_used + 1,
                    max_cycles: self.config.max_cycles,
                    snapshot: run.snapshot(),
                    steps: run.log.steps(),
                    catalog: offered.clone(),
                };
                self.decide(&ctx, &cancel).await
            };

            let decision = match decision {
                Ok(decision) => decision,
                Err(e) => return Err(self.fail(run, e)),
            };

            let call = match decision {
                Decision::Final { summary } => {
                    debug!(run_id = %run.run_id, "Backend signalled completion");
                    run.log.reasoning(format!("Final answer: {}", summary));
                    backend_summary = Some(summary);
                    break;
                }
                Decision::Invoke(call) => call,
            };

            run.cycles_used += 1;
            info!(
                run_id = %run.run_id,
                cycle = run.cycles_used,
                capability = %call.capability,
                "Cycle started"
            );

            run.log.reasoning(if call.reasoning.trim().is_empty() {
                format!("Selected {}", call.capability)
            } else {
                call.reasoning.clone()
            });

            if !offered.contains(&call.capability) {
                self.reject(&mut run, &call, &offered);
                continue;
            }

            // === EXECUTE / OBSERVE ===
            if let Err(e) = self.execute_step(&mut run, &call).await {
                return Err(self.fail(run, e));
            }
        }

        // === TERMINAL ===
        run.terminal = true;
        let report = report::assemble(&run, backend_summary);
        run.log.notify(RunEvent::Completed(Box::new(report.clone())));

        info!(
            run_id = %run.run_id,
            status = ?report.status,
            cycles = report.cycles_used,
            steps = report.steps.len(),
            "Agent: run complete"
        );

        Ok(report)
    }

    async fn decide(
        &self,
        ctx: &DecisionContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let timeout = self.config.backend_timeout;

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.backend.decide(ctx)) => match outcome {
                Ok(Ok(decision)) => Ok(decision),
                Ok(Err(AgentError::Backend(msg))) => Err(AgentError::Backend(msg)),
                Ok(Err(other)) => Err(AgentError::Backend(other.to_string())),
                Err(_) => Err(AgentError::Backend(format!(
                    "{} did not decide within {}s",
                    self.backend.name(),
                    timeout.as_secs()
                ))),
            }
        }
    }

    /// Append action + observation; capability errors become observations.
    async fn execute_step(&self, run: &mut AgentRun<'_>, call: &CapabilityCall) -> Result<()> {
        let name = call.capability.name();
        run.log.action(name, call.arguments.clone(), format!("Invoking {}", name));

        match self.executor.execute(call, run).await {
            Ok(outcome) => {
                run.log.observation(name, outcome.data, outcome.summary);
                run.record_outcome(call.capability, true);
                Ok(())
            }
            Err(e) => {
                run.log.observation(
                    name,
                    json!({ "error": e.to_string() }),
                    format!("{} failed: {}", name, e),
                );
                run.record_outcome(call.capability, false);

                if e.is_fatal() {
                    Err(e)
                } else {
                    warn!(run_id = %run.run_id, capability = name, error = %e, "Capability error fed back to backend");
                    Ok(())
                }
            }
        }
    }

    /// A decision outside the offered catalog is a capability error, not a fault.
    fn reject(&self, run: &mut AgentRun<'_>, call: &CapabilityCall, offered: &[Capability]) {
        let name = call.capability.name();
        let offered: Vec<&str> = offered.iter().map(|c| c.name()).collect();
        let err = AgentError::Capability(format!(
            "{} is not available at this point (offered: {})",
            name,
            offered.join(", ")
        ));

        warn!(run_id = %run.run_id, capability = name, "Backend chose a capability outside the catalog");

        run.log.action(name, call.arguments.clone(), format!("Invoking {}", name));
        run.log.observation(
            name,
            json!({ "error": err.to_string() }),
            format!("{} rejected: {}", name, err),
        );
        run.record_outcome(call.capability, false);
    }

    fn fail(&self, run: AgentRun<'_>, error: AgentError) -> RunFailure {
        error!(
            run_id = %run.run_id,
            cycles = run.cycles_used,
            steps = run.log.len(),
            error = %error,
            "Agent: run failed"
        );

        run.log.notify(RunEvent::Failed {
            error: error.to_string(),
            steps: run.log.steps().to_vec(),
        });

        RunFailure {
            error,
            steps: run.log.into_steps(),
        }
    }
}

/// Build an agent from environment configuration.
///
/// Gemini decides when `GEMINI_API_KEY` is set; otherwise the rule-based
/// procedure does.
pub fn create_default_agent(config: AgentConfig) -> Result<BudgetAgent> {
    let backend: Arc<dyn ReasoningBackend> = match GeminiBackend::from_env()? {
        Some(gemini) => Arc::new(gemini),
        None => {
            warn!("GEMINI_API_KEY not set; using the rule-based backend");
            Arc::new(RuleBasedBackend)
        }
    };

    let executor = CapabilityExecutor::new(provider_from_env()?, search_from_env()?, &config);

    Ok(BudgetAgent::new(backend, executor, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{demo_profile, demo_transactions, MAX_CYCLES};
    use crate::models::{BudgetStatus, RawTransaction, StepRole};
    use crate::provider::{StaticProvider, TransactionProvider};
    use crate::research::tests::ScriptedSearch;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn period() -> BillingPeriod {
        BillingPeriod::new(
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        )
        .unwrap()
    }

    fn fast_config() -> AgentConfig {
        AgentConfig {
            search_base_delay: Duration::from_millis(1),
            ..AgentConfig::default()
        }
    }

    fn agent_with(backend: Arc<dyn ReasoningBackend>, config: AgentConfig) -> BudgetAgent {
        let executor = CapabilityExecutor::new(
            Arc::new(StaticProvider::new(demo_transactions(&period()))),
            Arc::new(ScriptedSearch::new(&["cheap"])),
            &config,
        );
        BudgetAgent::new(backend, executor, config)
    }

    /// Replays a fixed list of decisions, then finishes.
    struct ScriptedBackend {
        decisions: Mutex<VecDeque<Decision>>,
    }

    impl ScriptedBackend {
        fn new(capabilities: &[Capability]) -> Self {
            Self {
                decisions: Mutex::new(
                    capabilities
                        .iter()
                        .map(|c| Decision::Invoke(CapabilityCall::new(*c, "scripted")))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn decide(&self, _ctx: &DecisionContext<'_>) -> Result<Decision> {
            let next = self.decisions.lock().unwrap().pop_front();
            Ok(next.unwrap_or(Decision::Final {
                summary: "script exhausted".into(),
            }))
        }
    }

    /// Never finishes on its own.
    struct RestlessBackend;

    #[async_trait]
    impl ReasoningBackend for RestlessBackend {
        fn name(&self) -> &'static str {
            "restless"
        }

        async fn decide(&self, ctx: &DecisionContext<'_>) -> Result<Decision> {
            let capability = ctx.catalog[ctx.cycle as usize % ctx.catalog.len()];
            Ok(Decision::Invoke(CapabilityCall::new(capability, "one more")))
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl ReasoningBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn decide(&self, _ctx: &DecisionContext<'_>) -> Result<Decision> {
            Err(AgentError::Backend("connection refused".into()))
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl ReasoningBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn decide(&self, _ctx: &DecisionContext<'_>) -> Result<Decision> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Decision::Final { summary: String::new() })
        }
    }

    struct UnreachableProvider;

    #[async_trait]
    impl TransactionProvider for UnreachableProvider {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn fetch(&self, _period: &BillingPeriod, _limit: Option<usize>) -> Result<Vec<RawTransaction>> {
            Err(AgentError::Provider("401 invalid access token".into()))
        }
    }

    #[tokio::test]
    async fn test_rule_based_run_on_worked_example() {
        let agent = agent_with(Arc::new(RuleBasedBackend), fast_config());
        let profile = demo_profile();

        let report = tokio_test::assert_ok!(
            agent.run(&profile, period(), None, CancellationToken::new()).await
        );

        assert_eq!(report.status, BudgetStatus::Alert);
        assert_eq!(report.cycles_used, 4);
        assert_eq!(report.deviations[0].category, "Food");
        assert_eq!(report.deviations[0].severity, 0.375);

        let plan = report.plan.as_ref().unwrap();
        let transfers: Vec<(&str, &str, f64)> = plan
            .transfers
            .iter()
            .map(|t| (t.from_category.as_str(), t.to_category.as_str(), t.amount))
            .collect();
        assert_eq!(
            transfers,
            vec![
                ("Entertainment", "Food", 60.0),
                ("Transport", "Food", 50.0),
                ("Other", "Food", 40.0),
            ]
        );
        assert!(plan.shortfalls.is_empty());
        assert!(report.verification.as_ref().unwrap().verified);

        // One of three queries fails, the recommendation still lands.
        assert_eq!(report.recommendations.len(), 1);
        assert!(!report.recommendations[0].references.is_empty());

        // Start: reasoning, fetch action, fetch observation.
        assert_eq!(report.steps[0].role, StepRole::Reasoning);
        assert_eq!(report.steps[1].tool.as_deref(), Some("fetch-transactions"));
        assert_eq!(report.steps[2].role, StepRole::Observation);
        for (i, step) in report.steps.iter().enumerate() {
            assert_eq!(step.index, i);
        }
    }

    #[tokio::test]
    async fn test_never_more_than_four_cycles() {
        let config = AgentConfig {
            max_cycles: 50,
            ..fast_config()
        };
        let agent = agent_with(Arc::new(RestlessBackend), config);
        assert_eq!(agent.config().max_cycles, MAX_CYCLES);

        let report = agent
            .run(&demo_profile(), period(), None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.cycles_used, MAX_CYCLES);
        let actions = report
            .steps
            .iter()
            .filter(|s| s.role == StepRole::Action)
            .count();
        // The initial fetch is not a cycle.
        assert_eq!(actions, MAX_CYCLES as usize + 1);
        assert!(report.backend_summary.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_exposes_partial_log() {
        let agent = agent_with(Arc::new(BrokenBackend), fast_config());

        let failure = tokio_test::assert_err!(
            agent
                .run(&demo_profile(), period(), None, CancellationToken::new())
                .await
        );

        assert!(matches!(failure.error, AgentError::Backend(_)));
        assert_eq!(failure.steps.len(), 3);
        assert_eq!(failure.steps[2].role, StepRole::Observation);
    }

    #[tokio::test]
    async fn test_backend_timeout_is_fatal() {
        let config = AgentConfig {
            backend_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let agent = agent_with(Arc::new(SlowBackend), config);

        let failure = agent
            .run(&demo_profile(), period(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(failure.error.to_string().contains("did not decide"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_fatal() {
        let config = fast_config();
        let executor = CapabilityExecutor::new(
            Arc::new(UnreachableProvider),
            Arc::new(ScriptedSearch::new(&[])),
            &config,
        );
        let agent = BudgetAgent::new(Arc::new(RuleBasedBackend), executor, config);

        let failure = agent
            .run(&demo_profile(), period(), None, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AgentError::Provider(_)));
        let last = failure.steps.last().unwrap();
        assert_eq!(last.tool.as_deref(), Some("fetch-transactions"));
        assert!(last.result.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("401"));
    }

    struct StalledProvider;

    #[async_trait]
    impl TransactionProvider for StalledProvider {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch(&self, _period: &BillingPeriod, _limit: Option<usize>) -> Result<Vec<RawTransaction>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_stalled_fetch_is_retried_then_reported_empty() {
        let config = AgentConfig {
            capability_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let executor = CapabilityExecutor::new(
            Arc::new(StalledProvider),
            Arc::new(ScriptedSearch::new(&[])),
            &config,
        );
        let agent = BudgetAgent::new(Arc::new(RuleBasedBackend), executor, config);

        let report = tokio_test::assert_ok!(
            agent
                .run(&demo_profile(), period(), None, CancellationToken::new())
                .await
        );

        assert_eq!(report.status, BudgetStatus::Good);
        assert_eq!(report.cycles_used, 1);
        assert!(report.message.contains("no transactions"));
        let timeouts = report
            .steps
            .iter()
            .filter(|s| s.role == StepRole::Observation && s.content.contains("timed out"))
            .count();
        assert_eq!(timeouts, 2);
    }

    #[tokio::test]
    async fn test_capability_error_is_recorded_and_run_continues() {
        let backend = ScriptedBackend::new(&[
            Capability::Reallocate,
            Capability::Categorize,
            Capability::DetectDeviations,
        ]);
        let agent = agent_with(Arc::new(backend), fast_config());

        let report = agent
            .run(&demo_profile(), period(), None, CancellationToken::new())
            .await
            .unwrap();

        let rejected = report
            .steps
            .iter()
            .find(|s| s.role == StepRole::Observation && s.tool.as_deref() == Some("reallocate"))
            .unwrap();
        assert!(rejected.content.contains("not available"));

        assert_eq!(report.cycles_used, 3);
        assert_eq!(report.deviations.len(), 6);
        assert!(report.plan.is_none());
        assert_eq!(report.backend_summary.as_deref(), Some("script exhausted"));
    }

    #[tokio::test]
    async fn test_cancellation_at_decision_boundary() {
        let agent = agent_with(Arc::new(RuleBasedBackend), fast_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = agent
            .run(&demo_profile(), period(), None, cancel)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AgentError::Cancelled));
        // The start fetch completed before the first decision point.
        assert_eq!(failure.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_observer_sees_steps_then_completion() {
        let agent = agent_with(Arc::new(RuleBasedBackend), fast_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = agent
            .run(&demo_profile(), period(), Some(tx), CancellationToken::new())
            .await
            .unwrap();

        let mut steps = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::Step(_) => {
                    assert!(!completed);
                    steps += 1;
                }
                RunEvent::Completed(done) => {
                    assert_eq!(done.run_id, report.run_id);
                    completed = true;
                }
                RunEvent::Failed { .. } => panic!("unexpected failure event"),
            }
        }
        assert!(completed);
        assert_eq!(steps, report.steps.len());
    }

    #[tokio::test]
    async fn test_invalid_profile_fails_before_fetch() {
        let agent = agent_with(Arc::new(RuleBasedBackend), fast_config());
        let mut profile = demo_profile();
        profile.categories.pop();

        let failure = agent
            .run(&profile, period(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, AgentError::InvalidProfile(_)));
        assert!(failure.steps.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_runs_fingerprint_identically() {
        let agent = agent_with(Arc::new(RuleBasedBackend), fast_config());
        let profile = demo_profile();

        let first = agent.run(&profile, period(), None, CancellationToken::new()).await.unwrap();
        let second = agent.run(&profile, period(), None, CancellationToken::new()).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.fingerprint, second.fingerprint);
    }
}
