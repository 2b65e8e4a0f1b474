//! Report orchestrator - drives the generation state machine
//!
//! Idle → Generating → Verifying → (Correcting → Verifying)* → Done | Cancelled
//!
//! Attempt 1 is the first draft; every later attempt is one correction round.

use crate::corrector::Corrector;
use crate::error::{OrchestrationError, PipelineError};
use crate::generator::Generator;
use crate::models::{
    CompletedReport, GenerationAttempt, Phase, ProgressEvent, ReportRequest, VerificationStatus,
};
use crate::verification::{create_default_verification_engine, VerificationEngine, DEFAULT_TOLERANCE};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Generation plus correction rounds, at least 1
    pub max_attempts: u32,
    pub tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Cooperative cancellation flag, polled at every state transition
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run handle: identity, cancellation and an optional progress sink
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    cancel: CancelToken,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl RunContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn emit(&self, attempt_number: u32, phase: Phase) {
        if let Some(progress) = &self.progress {
            // a host that stopped listening does not stop the run
            let _ = progress.send(ProgressEvent {
                run_id: self.run_id,
                attempt_number,
                phase,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Generating,
    Verifying,
    Correcting,
    Done(VerificationStatus),
    Cancelled,
}

impl RunState {
    fn phase(self) -> Option<Phase> {
        match self {
            RunState::Generating => Some(Phase::Generating),
            RunState::Verifying => Some(Phase::Verifying),
            RunState::Correcting => Some(Phase::Correcting),
            RunState::Idle | RunState::Done(_) | RunState::Cancelled => None,
        }
    }
}

/// Main orchestrator that coordinates generation, verification and correction
pub struct Orchestrator {
    generator: Box<dyn Generator>,
    corrector: Box<dyn Corrector>,
    verification_engine: VerificationEngine,
    max_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        generator: Box<dyn Generator>,
        corrector: Box<dyn Corrector>,
        verification_engine: VerificationEngine,
        max_attempts: u32,
    ) -> Self {
        Self {
            generator,
            corrector,
            verification_engine,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(
        generator: Box<dyn Generator>,
        corrector: Box<dyn Corrector>,
        config: PipelineConfig,
    ) -> Self {
        Self::new(
            generator,
            corrector,
            create_default_verification_engine(config.tolerance),
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run the pipeline for one request until pass, budget exhaustion or cancellation
    pub async fn run(&self, request: &ReportRequest, ctx: &RunContext) -> Result<CompletedReport> {
        let started = Instant::now();
        let mut state = RunState::Idle;
        let mut attempt: u32 = 1;
        let mut cost_usd = 0.0;

        info!(
            run_id = %ctx.run_id,
            current = %request.current_period.name,
            prior = %request.prior_period.name,
            max_attempts = self.max_attempts,
            "Orchestrator: starting run"
        );

        // === GENERATE ===
        state = self.transition(ctx, state, RunState::Generating, attempt)?;
        let generated = self.generator.generate(request).await;
        self.ensure_active(ctx, attempt)?;

        let draft = generated.map_err(|e| {
            warn!(run_id = %ctx.run_id, error = %e, "Generation failed");
            OrchestrationError::GenerationFailed(e)
        })?;
        cost_usd += draft.cost_usd;
        let mut report = draft.report;

        loop {
            // === VERIFY ===
            state = self.transition(ctx, state, RunState::Verifying, attempt)?;
            let verification = self.verification_engine.verify(&report);

            if !verification.is_failed() {
                let status = verification.overall_status;
                self.transition(ctx, state, RunState::Done(status), attempt)?;

                info!(
                    run_id = %ctx.run_id,
                    attempt,
                    status = %status,
                    cost_usd,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run complete"
                );

                return Ok(CompletedReport {
                    run_id: ctx.run_id,
                    company_name: report.company_name.clone(),
                    report,
                    verification,
                    attempts: attempt,
                    cost_usd,
                });
            }

            if attempt >= self.max_attempts {
                warn!(
                    run_id = %ctx.run_id,
                    attempts = attempt,
                    failed_checks = verification.actionable_failures().count(),
                    "Correction budget exhausted"
                );
                return Err(OrchestrationError::ConsistencyNotAchieved {
                    attempts: attempt,
                    last_attempt: Box::new(GenerationAttempt {
                        attempt_number: attempt,
                        report: Some(report),
                        verification: Some(verification),
                    }),
                });
            }

            // === CORRECT ===
            attempt += 1;
            state = self.transition(ctx, state, RunState::Correcting, attempt)?;
            let corrected = self
                .corrector
                .correct(&report, &verification, &request.preferences)
                .await;
            self.ensure_active(ctx, attempt)?;

            match corrected {
                Ok(draft) => {
                    cost_usd += draft.cost_usd;
                    report = draft.report;
                }
                // the attempt is spent; the previous report stays current
                Err(PipelineError::Schema { reason, .. }) => {
                    warn!(
                        run_id = %ctx.run_id,
                        attempt,
                        reason = %reason,
                        "Correction returned an unparseable report"
                    );
                }
                Err(e) => {
                    warn!(run_id = %ctx.run_id, attempt, error = %e, "Correction failed");
                    return Err(OrchestrationError::CorrectionFailed { attempt, source: e });
                }
            }
        }
    }

    fn transition(
        &self,
        ctx: &RunContext,
        from: RunState,
        to: RunState,
        attempt: u32,
    ) -> Result<RunState> {
        self.ensure_active(ctx, attempt)?;

        debug!(run_id = %ctx.run_id, attempt, from = ?from, to = ?to, "State transition");
        if let Some(phase) = to.phase() {
            ctx.emit(attempt, phase);
        }
        Ok(to)
    }

    fn ensure_active(&self, ctx: &RunContext, attempt: u32) -> Result<()> {
        if ctx.is_cancelled() {
            info!(run_id = %ctx.run_id, attempt, state = ?RunState::Cancelled, "Run cancelled");
            return Err(OrchestrationError::Cancelled { attempt });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ResilientClient, RetryPolicy};
    use crate::corrector::LlmCorrector;
    use crate::error::ClientError;
    use crate::generator::{Draft, LlmGenerator};
    use crate::models::{Report, ReportingPeriod, VerificationResult};
    use crate::testing::{balanced_report, documents, ScriptedTransport};
    use crate::verification::{RuleOutcome, VerificationRule};
    use crate::workflow::GenerationPreferences;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{mpsc, Notify};

    struct StubGenerator {
        outcome: std::result::Result<Report, PipelineError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(
            &self,
            _request: &ReportRequest,
        ) -> std::result::Result<Draft, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map(|report| Draft {
                report,
                model_id: "stub".to_string(),
                cost_usd: 0.01,
            })
        }
    }

    /// Replays scripted outcomes, then echoes the input report back unchanged
    struct StubCorrector {
        outcomes: Mutex<VecDeque<std::result::Result<Report, PipelineError>>>,
        calls: Arc<AtomicUsize>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl Corrector for StubCorrector {
        async fn correct(
            &self,
            report: &Report,
            _verification: &VerificationResult,
            _preferences: &GenerationPreferences,
        ) -> std::result::Result<Draft, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }

            let next = self.outcomes.lock().pop_front();
            next.unwrap_or_else(|| Ok(report.clone())).map(|report| Draft {
                report,
                model_id: "stub".to_string(),
                cost_usd: 0.02,
            })
        }
    }

    struct CountingRule {
        evaluations: Arc<AtomicUsize>,
        always_fail: bool,
    }

    impl VerificationRule for CountingRule {
        fn name(&self) -> &'static str {
            "Counting Rule"
        }

        fn principle(&self) -> &'static str {
            "Always evaluated"
        }

        fn evaluate(&self, _report: &Report, _period: ReportingPeriod) -> RuleOutcome {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            RuleOutcome::Evaluated {
                expected: 0.0,
                reported: if self.always_fail { 10.0 } else { 0.0 },
            }
        }
    }

    struct Harness {
        generator_calls: Arc<AtomicUsize>,
        corrector_calls: Arc<AtomicUsize>,
        evaluations: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                generator_calls: Arc::new(AtomicUsize::new(0)),
                corrector_calls: Arc::new(AtomicUsize::new(0)),
                evaluations: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn orchestrator(
            &self,
            generated: std::result::Result<Report, PipelineError>,
            corrections: Vec<std::result::Result<Report, PipelineError>>,
            always_fail: bool,
            gate: Option<(Arc<Notify>, Arc<Notify>)>,
        ) -> Orchestrator {
            let mut engine = VerificationEngine::default();
            engine.add_rule(Box::new(CountingRule {
                evaluations: self.evaluations.clone(),
                always_fail,
            }));

            Orchestrator::new(
                Box::new(StubGenerator {
                    outcome: generated,
                    calls: self.generator_calls.clone(),
                }),
                Box::new(StubCorrector {
                    outcomes: Mutex::new(corrections.into()),
                    calls: self.corrector_calls.clone(),
                    gate,
                }),
                engine,
                DEFAULT_MAX_ATTEMPTS,
            )
        }
    }

    fn report_request() -> ReportRequest {
        let (current_period, prior_period) = documents();
        ReportRequest {
            company_name: Some("Acme Holdings".to_string()),
            current_period,
            prior_period,
            preferences: GenerationPreferences::default(),
        }
    }

    fn unbalanced_report() -> Report {
        let mut report = balanced_report(1_500_000.0, 500_000.0, 1_000_000.0);
        report.balance_sheet.total_equity.current = Some(900_000.0);
        report
    }

    #[tokio::test]
    async fn test_passes_at_first_attempt() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            Ok(balanced_report(1_500_000.0, 500_000.0, 1_000_000.0)),
            vec![],
            false,
            None,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(Uuid::new_v4()).with_progress(tx);

        let completed = orchestrator.run(&report_request(), &ctx).await.unwrap();

        assert_eq!(completed.attempts, 1);
        assert_eq!(completed.run_id, ctx.run_id());
        assert_eq!(completed.company_name, "Acme Holdings");
        assert_eq!(completed.verification.overall_status, VerificationStatus::Passed);
        assert!((completed.cost_usd - 0.01).abs() < 1e-12);
        assert_eq!(harness.corrector_calls.load(Ordering::SeqCst), 0);

        let phases: Vec<(u32, Phase)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.attempt_number, e.phase))
            .collect();
        assert_eq!(phases, vec![(1, Phase::Generating), (1, Phase::Verifying)]);
    }

    #[tokio::test]
    async fn test_missing_figure_passes_with_warnings() {
        let mut report = balanced_report(1_500_000.0, 500_000.0, 1_000_000.0);
        report.cash_flow.net_change_in_cash.prior = None;

        let harness = Harness::new();
        let orchestrator = harness.orchestrator(Ok(report), vec![], false, None);

        let completed = orchestrator
            .run(&report_request(), &RunContext::new(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(
            completed.verification.overall_status,
            VerificationStatus::PassedWithWarnings
        );
        assert_eq!(harness.corrector_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_always_failing_verifier_stops_at_max_attempts() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            Ok(balanced_report(1_500_000.0, 500_000.0, 1_000_000.0)),
            vec![],
            true,
            None,
        );

        let err = orchestrator
            .run(&report_request(), &RunContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();

        match err {
            OrchestrationError::ConsistencyNotAchieved { attempts, last_attempt } => {
                assert_eq!(attempts, DEFAULT_MAX_ATTEMPTS);
                assert_eq!(last_attempt.attempt_number, DEFAULT_MAX_ATTEMPTS);
                assert!(last_attempt.verification.unwrap().is_failed());
            }
            other => panic!("expected ConsistencyNotAchieved, got {:?}", other),
        }

        let generations = harness.generator_calls.load(Ordering::SeqCst);
        let corrections = harness.corrector_calls.load(Ordering::SeqCst);
        assert_eq!(generations, 1);
        assert_eq!(generations + corrections, DEFAULT_MAX_ATTEMPTS as usize);
        // one verification per attempt, one evaluation per period
        assert_eq!(harness.evaluations.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_cancel_during_correction_discards_result() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let harness = Harness::new();
        let orchestrator = Arc::new(harness.orchestrator(
            Ok(unbalanced_report()),
            vec![Ok(balanced_report(1_500_000.0, 500_000.0, 1_000_000.0))],
            false,
            Some((started.clone(), release.clone())),
        ));

        let ctx = RunContext::new(Uuid::new_v4());
        let token = ctx.cancel_token();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run(&report_request(), &ctx).await }
        });

        started.notified().await;
        assert_eq!(harness.evaluations.load(Ordering::SeqCst), 2);

        token.cancel();
        release.notify_one();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled { attempt: 2 }));
        // the successful correction was never re-verified
        assert_eq!(harness.evaluations.load(Ordering::SeqCst), 2);
        assert_eq!(harness.corrector_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(Ok(unbalanced_report()), vec![], false, None);
        let ctx = RunContext::new(Uuid::new_v4());
        ctx.cancel();

        let err = orchestrator.run(&report_request(), &ctx).await.unwrap_err();

        assert!(matches!(err, OrchestrationError::Cancelled { attempt: 1 }));
        assert_eq!(harness.generator_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_error_fails_run() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            Err(PipelineError::Client(ClientError::Unauthorized { status: 401 })),
            vec![],
            false,
            None,
        );

        let err = orchestrator
            .run(&report_request(), &RunContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestrationError::GenerationFailed(PipelineError::Client(ClientError::Unauthorized { .. }))
        ));
        assert_eq!(harness.evaluations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schema_error_in_correction_consumes_attempt() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            Ok(unbalanced_report()),
            vec![
                Err(PipelineError::schema("not json", "invalid report JSON")),
                Ok(balanced_report(1_500_000.0, 500_000.0, 1_000_000.0)),
            ],
            false,
            None,
        );

        let completed = orchestrator
            .run(&report_request(), &RunContext::new(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(completed.attempts, 3);
        assert_eq!(harness.corrector_calls.load(Ordering::SeqCst), 2);
        assert_eq!(completed.verification.overall_status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn test_client_error_in_correction_is_fatal() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            Ok(unbalanced_report()),
            vec![Err(PipelineError::Client(ClientError::Server { status: 503 }))],
            false,
            None,
        );

        let err = orchestrator
            .run(&report_request(), &RunContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();

        match err {
            OrchestrationError::CorrectionFailed { attempt, source } => {
                assert_eq!(attempt, 2);
                assert_eq!(source, PipelineError::Client(ClientError::Server { status: 503 }));
            }
            other => panic!("expected CorrectionFailed, got {:?}", other),
        }
        assert_eq!(harness.corrector_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_single_correction() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text(&serde_json::to_string(&unbalanced_report()).unwrap());
        transport.push_text(
            &serde_json::to_string(&balanced_report(1_500_000.0, 500_000.0, 1_000_000.0))
                .unwrap(),
        );

        let client = Arc::new(ResilientClient::new(
            transport.clone(),
            ClientConfig {
                retry: RetryPolicy::no_retries(),
                ..ClientConfig::default()
            },
        ));
        let orchestrator = Orchestrator::from_config(
            Box::new(LlmGenerator::new(client.clone())),
            Box::new(LlmCorrector::new(client.clone())),
            PipelineConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(Uuid::new_v4()).with_progress(tx);
        let completed = orchestrator.run(&report_request(), &ctx).await.unwrap();

        assert_eq!(completed.attempts, 2);
        assert_eq!(transport.calls(), 2);
        assert_eq!(completed.verification.overall_status, VerificationStatus::Passed);
        assert_eq!(
            completed.report.balance_sheet.total_equity.current,
            Some(1_000_000.0)
        );
        assert!(completed.cost_usd > 0.0);
        assert!((completed.cost_usd - client.usage().cost_usd).abs() < 1e-12);

        let correction_prompt = &transport.requests()[1].messages[1].text;
        assert!(correction_prompt.contains("discrepancy +100000.00"));

        let phases: Vec<(u32, Phase)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.attempt_number, e.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                (1, Phase::Generating),
                (1, Phase::Verifying),
                (2, Phase::Correcting),
                (2, Phase::Verifying),
            ]
        );
    }
}
