//! Executor - applies a deployment plan wave by wave
//!
//! - Validation runs first; an invalid plan never reaches the provider
//! - Modules of one wave run concurrently in a `JoinSet`
//! - A failed module skips its transitive dependents; other branches continue
//! - Unchanged modules (same input fingerprint) reuse stored outputs
//! - Fail-fast or an external cancel skips every module not yet started

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::ast::{DeploymentPlan, GlobalParams, Module};
use crate::binding::{resolve_inputs, resolve_plan_outputs};
use crate::dag::{self, ModuleGraph};
use crate::error::{panic_message, DeployError, Result};
use crate::event::{EventKind, EventLog};
use crate::provider::{ApplyRequest, ModuleOutputs, ModuleProvider};
use crate::resilience::{classify_provider_error, RetryPolicy};
use crate::store::{fingerprint, MemoryStateStore, ModuleSnapshot, OutputStore, StateStore};

use super::report::{ApplyOutcome, FailureReport, ModuleState, ModuleStates};

/// Outcome of one spawned module apply
struct Applied {
    module: Arc<str>,
    fingerprint: String,
    result: Result<ModuleOutputs>,
    duration: Duration,
}

/// Bookkeeping owned by a single `apply` call
struct Run {
    states: ModuleStates,
    report: FailureReport,
    event_log: EventLog,
    unchanged: Vec<String>,
}

impl Run {
    fn skip(&mut self, module: &Arc<str>, reason: String) -> Result<()> {
        self.states.transition(module, ModuleState::Skipped)?;
        debug!(module = %module, reason = %reason, "module skipped");
        self.event_log.emit(EventKind::ModuleSkipped {
            module: Arc::clone(module),
            reason: reason.clone(),
        });
        self.report.record_skipped(module.as_ref(), reason);
        Ok(())
    }

    fn fail(&mut self, module: &Arc<str>, error: &DeployError, duration: Duration) -> Result<()> {
        self.states.transition(module, ModuleState::Failed)?;
        error!(module = %module, error = %error, "module failed");
        self.event_log.emit(EventKind::ModuleFailed {
            module: Arc::clone(module),
            error: error.to_string(),
            duration_ms: duration.as_millis() as u64,
        });
        self.report.record_failed(module.as_ref(), error.to_string());
        Ok(())
    }
}

/// Deployment graph executor
pub struct Executor {
    provider: Arc<dyn ModuleProvider>,
    state: Arc<dyn StateStore>,
    retry: RetryPolicy,
    event_log: EventLog,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(provider: Arc<dyn ModuleProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(MemoryStateStore::new()),
            retry: RetryPolicy::default(),
            event_log: EventLog::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Cancelling this token skips every module not yet started
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate and apply a plan with the given global parameters
    ///
    /// Only validation errors are returned as `Err`; module failures are
    /// collected into the outcome's `FailureReport`.
    #[instrument(skip(self, plan), fields(plan = %plan.name, modules = plan.modules.len()))]
    pub async fn apply(&self, plan: &DeploymentPlan, params: GlobalParams) -> Result<ApplyOutcome> {
        let order = dag::plan(plan)?;
        let graph = ModuleGraph::from_plan(plan);
        let deployment_id = format!("{}-{}", plan.name, Utc::now().format("%Y%m%d%H%M%S"));
        let started = Instant::now();

        info!(
            deployment = %deployment_id,
            waves = order.len(),
            environment = %params.environment,
            region = %params.region,
            "starting deployment"
        );
        self.event_log.emit(EventKind::DeploymentStarted {
            deployment_id: deployment_id.clone(),
            plan: plan.name.clone(),
            module_count: order.module_count(),
            wave_count: order.len(),
            environment: params.environment.to_string(),
            region: params.region.to_string(),
        });

        let outputs = OutputStore::new();
        let module_ids = order.order();
        let mut run = Run {
            states: ModuleStates::new(&module_ids),
            report: FailureReport::default(),
            event_log: self.event_log.clone(),
            unchanged: Vec::new(),
        };
        let mut cancelled = false;

        for (index, wave) in order.waves().iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
            }
            if cancelled {
                for module in wave {
                    run.skip(module, "cancelled".to_string())?;
                }
                continue;
            }

            debug!(wave = index, modules = wave.len(), "starting wave");
            self.event_log.emit(EventKind::WaveStarted {
                index,
                modules: wave.clone(),
            });

            let failures_before = run.report.failed.len();
            let mut join_set = JoinSet::new();
            let mut in_flight: Vec<Arc<str>> = Vec::with_capacity(wave.len());

            for id in wave {
                // Every dependency must be Applied, otherwise skip
                let blocked = graph
                    .get_dependencies(id)
                    .iter()
                    .find(|dep| run.states.get(dep) != Some(ModuleState::Applied));
                if let Some(dep) = blocked {
                    let dep_state = run.states.get(dep).map_or("missing", |s| s.as_str());
                    run.skip(id, format!("dependency '{}' {}", dep, dep_state))?;
                    continue;
                }
                run.states.transition(id, ModuleState::Ready)?;

                let Some(module) = plan.module(id) else {
                    continue;
                };
                let inputs = match resolve_inputs(module, &outputs) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        self.fail(&mut run, id, &e, Duration::ZERO).await?;
                        continue;
                    }
                };
                let fingerprint = fingerprint(id, &inputs, &params);

                match self.state.load(id).await {
                    Ok(Some(snapshot)) if snapshot.fingerprint == fingerprint => {
                        if let Err(e) = outputs.insert(Arc::clone(id), snapshot.outputs) {
                            self.fail(&mut run, id, &e, Duration::ZERO).await?;
                            continue;
                        }
                        run.states.transition(id, ModuleState::Applied)?;
                        debug!(module = %id, "unchanged, reusing stored outputs");
                        self.event_log.emit(EventKind::ModuleUnchanged {
                            module: Arc::clone(id),
                            fingerprint,
                        });
                        run.unchanged.push(id.to_string());
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.fail(&mut run, id, &e, Duration::ZERO).await?;
                        continue;
                    }
                }

                run.states.transition(id, ModuleState::Applying)?;
                self.event_log.emit(EventKind::ModuleStarted {
                    module: Arc::clone(id),
                    inputs: serde_json::to_value(&inputs).unwrap_or(Value::Null),
                    fingerprint: fingerprint.clone(),
                });

                let request = self.build_request(module, inputs, params);
                in_flight.push(Arc::clone(id));
                join_set.spawn(Self::apply_module(
                    Arc::clone(&self.provider),
                    self.retry.clone(),
                    Arc::clone(id),
                    fingerprint,
                    request,
                ));
            }

            while let Some(joined) = join_set.join_next().await {
                let applied = match joined {
                    Ok(applied) => applied,
                    Err(e) => {
                        error!(error = %e, "module task aborted");
                        continue;
                    }
                };
                in_flight.retain(|m| m != &applied.module);
                self.record(&mut run, &outputs, applied).await?;
            }

            // Tasks that never reported back
            for id in in_flight {
                let aborted = DeployError::ModulePanicked {
                    reason: format!("task for '{}' aborted", id),
                };
                self.fail(&mut run, &id, &aborted, Duration::ZERO).await?;
            }

            if plan.fail_fast && run.report.failed.len() > failures_before {
                warn!(wave = index, "fail-fast: cancelling remaining waves");
                cancelled = true;
            }
        }

        let applied = run.states.in_state(ModuleState::Applied).len();
        let duration = started.elapsed();
        info!(
            deployment = %deployment_id,
            applied,
            failed = run.report.failed.len(),
            skipped = run.report.skipped.len(),
            duration_ms = duration.as_millis() as u64,
            "deployment finished"
        );
        self.event_log.emit(EventKind::DeploymentCompleted {
            applied,
            failed: run.report.failed.len(),
            skipped: run.report.skipped.len(),
            total_duration_ms: duration.as_millis() as u64,
        });

        Ok(ApplyOutcome {
            deployment_id,
            outputs: resolve_plan_outputs(plan, &outputs),
            states: run.states.to_map(),
            report: run.report,
            unchanged: run.unchanged,
            duration_ms: duration.as_millis() as u64,
        })
    }

    fn build_request(
        &self,
        module: &Module,
        inputs: std::collections::BTreeMap<String, Value>,
        params: GlobalParams,
    ) -> ApplyRequest {
        ApplyRequest {
            module: module.name.clone(),
            inputs,
            params,
            outputs: module.outputs.clone(),
            command: module.command.clone(),
        }
    }

    /// Provider call with retries; panics become module failures
    async fn apply_module(
        provider: Arc<dyn ModuleProvider>,
        retry: RetryPolicy,
        module: Arc<str>,
        fingerprint: String,
        request: ApplyRequest,
    ) -> Applied {
        let start = Instant::now();
        let operation = format!("apply {}", module);

        let call = retry.execute(&operation, || {
            let provider = Arc::clone(&provider);
            let request = &request;
            let module = &module;
            async move {
                provider
                    .apply_module(request)
                    .await
                    .map_err(|e| classify_provider_error(module, e))
            }
        });

        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(DeployError::ModulePanicked {
                reason: panic_message(panic.as_ref()),
            }),
        };

        Applied {
            module,
            fingerprint,
            result,
            duration: start.elapsed(),
        }
    }

    /// Record a failure and drop the module's snapshot so the next run re-applies it
    async fn fail(
        &self,
        run: &mut Run,
        module: &Arc<str>,
        error: &DeployError,
        duration: Duration,
    ) -> Result<()> {
        run.fail(module, error, duration)?;
        if let Err(e) = self.state.remove(module).await {
            warn!(module = %module, error = %e, "failed module kept its stale snapshot");
        }
        Ok(())
    }

    /// Store outputs and state for a finished module, or record its failure
    async fn record(&self, run: &mut Run, outputs: &OutputStore, applied: Applied) -> Result<()> {
        let Applied {
            module,
            fingerprint,
            result,
            duration,
        } = applied;

        let module_outputs = match result {
            Ok(module_outputs) => module_outputs,
            Err(e) => return self.fail(run, &module, &e, duration).await,
        };

        if let Err(e) = outputs.insert(Arc::clone(&module), module_outputs.clone()) {
            return self.fail(run, &module, &e, duration).await;
        }
        run.states.transition(&module, ModuleState::Applied)?;

        let snapshot = ModuleSnapshot::new(fingerprint, module_outputs.clone());
        if let Err(e) = self.state.save(&module, snapshot).await {
            warn!(module = %module, error = %e, "applied but state was not saved");
        }

        info!(module = %module, duration_ms = duration.as_millis() as u64, "module applied");
        self.event_log.emit(EventKind::ModuleApplied {
            module,
            outputs: serde_json::to_value(&module_outputs).unwrap_or(Value::Null),
            duration_ms: duration.as_millis() as u64,
        });
        Ok(())
    }
}

