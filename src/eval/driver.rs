use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::EvalConfig;
use crate::environment::{Environment, EnvironmentFactory, EnvironmentInstance};
use crate::error::{EnvError, EvalError, PolicyError};
use crate::eval::decision::{Decision, DecisionChannel};
use crate::eval::policy::{PolicyClient, PolicyRequest};
use crate::eval::recorder::EpisodeRecorder;
use crate::eval::{
    EpisodeRecord, EpisodeResult, EvalReport, FaultKind, StopSignal, WorkerFault,
};

/// Runs `n_episodes` of one task over `n_envs` parallel environments.
///
/// Episodes are not dealt round-robin to fixed slots: each worker takes the
/// next episode index from a shared counter when it goes idle, so the
/// survivors pick up a retired worker's share. Episode `k` always resets
/// with seed `config.seed + k`.
pub struct BatchedEvaluator {
    config: EvalConfig,
    factory: EnvironmentFactory,
    policy: Arc<dyn PolicyClient>,
}

struct WorkerContext<'a> {
    config: &'a EvalConfig,
    policy: &'a Arc<dyn PolicyClient>,
    tickets: &'a AtomicUsize,
    stop: &'a StopSignal,
}

struct WorkerOutcome {
    worker: usize,
    records: Vec<EpisodeRecord>,
    fault: Option<WorkerFault>,
    cancelled: usize,
    timeouts: usize,
}

impl WorkerOutcome {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            records: Vec::new(),
            fault: None,
            cancelled: 0,
            timeouts: 0,
        }
    }

    fn panicked(worker: usize) -> Self {
        Self {
            fault: Some(WorkerFault {
                worker,
                episode: None,
                kind: FaultKind::Panic,
                reason: "worker thread panicked".to_string(),
            }),
            ..Self::new(worker)
        }
    }
}

enum EpisodeOutcome {
    Finished { result: EpisodeResult, timeouts: usize },
    Cancelled { timeouts: usize },
}

enum EpisodeFailure {
    Env(EnvError),
    Policy(PolicyError),
}

impl From<EnvError> for EpisodeFailure {
    fn from(error: EnvError) -> Self {
        EpisodeFailure::Env(error)
    }
}

impl EpisodeFailure {
    fn into_fault(self, worker: usize, episode: usize) -> WorkerFault {
        let (kind, reason) = match self {
            EpisodeFailure::Env(EnvError::Action(e)) => (FaultKind::Action, e.to_string()),
            EpisodeFailure::Env(e) => (FaultKind::Simulator, e.to_string()),
            EpisodeFailure::Policy(e) => (FaultKind::Policy, e.to_string()),
        };
        WorkerFault {
            worker,
            episode: Some(episode),
            kind,
            reason,
        }
    }
}

struct Worker<'a> {
    id: usize,
    env: EnvironmentInstance,
    decisions: DecisionChannel,
    recorder: Option<EpisodeRecorder>,
    ctx: &'a WorkerContext<'a>,
}

impl<'a> Worker<'a> {
    fn new(id: usize, env: EnvironmentInstance, ctx: &'a WorkerContext<'a>) -> Self {
        let decisions = DecisionChannel::new(
            Arc::clone(ctx.policy),
            id,
            ctx.config.decision_timeout(),
        );

        let recorder = ctx.config.video_dir.as_deref().and_then(|dir| {
            EpisodeRecorder::new(dir, id)
                .map_err(|e| {
                    tracing::warn!(worker = id, error = %e, "episode recording disabled");
                })
                .ok()
        });

        Self {
            id,
            env,
            decisions,
            recorder,
            ctx,
        }
    }

    /// Recording failures disable the recorder; they never fail an episode.
    fn record(&mut self, write: impl FnOnce(&mut EpisodeRecorder) -> std::io::Result<()>) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = write(recorder) {
                tracing::warn!(worker = self.id, error = %e, "episode recording disabled");
                self.recorder = None;
            }
        }
    }

    fn run(mut self) -> WorkerOutcome {
        let mut outcome = WorkerOutcome::new(self.id);

        while !self.ctx.stop.is_raised() {
            // Next unclaimed episode, whichever worker finished last.
            let episode = self.ctx.tickets.fetch_add(1, Ordering::SeqCst);
            if episode >= self.ctx.config.n_episodes {
                break;
            }
            let seed = self.ctx.config.seed.wrapping_add(episode as u64);

            match self.episode(episode, seed) {
                Ok(EpisodeOutcome::Finished { result, timeouts }) => {
                    tracing::info!(
                        worker = self.id,
                        episode,
                        seed,
                        success = result.success,
                        steps = result.steps_taken,
                        "episode finished"
                    );
                    outcome.timeouts += timeouts;
                    outcome.records.push(EpisodeRecord {
                        worker: self.id,
                        ordinal: outcome.records.len(),
                        episode,
                        seed,
                        timeouts,
                        result,
                    });
                }
                Ok(EpisodeOutcome::Cancelled { timeouts }) => {
                    tracing::info!(worker = self.id, episode, "episode cancelled");
                    outcome.timeouts += timeouts;
                    outcome.cancelled += 1;
                    break;
                }
                Err(failure) => {
                    let fault = failure.into_fault(self.id, episode);
                    tracing::warn!(
                        worker = self.id,
                        episode,
                        kind = ?fault.kind,
                        reason = fault.reason.as_str(),
                        "worker retired"
                    );
                    outcome.fault = Some(fault);
                    break;
                }
            }
        }

        self.env.close();
        outcome
    }

    fn episode(&mut self, episode: usize, seed: u64) -> Result<EpisodeOutcome, EpisodeFailure> {
        let mut observation = self.env.reset(seed)?;
        self.record(|r| r.begin(episode));
        self.record(|r| r.record(&observation));

        let mut timeouts = 0;
        loop {
            let request = PolicyRequest {
                observation,
                embodiment_tag: self.env.embodiment_tag().to_string(),
            };

            let action = match self.decisions.decide(request) {
                Decision::Action(action) => action,
                Decision::TimedOut(timeout) => {
                    timeouts += 1;
                    tracing::warn!(
                        worker = self.id,
                        episode,
                        timeout_ms = timeout.timeout_ms,
                        "policy decision timed out, substituting neutral action"
                    );
                    self.env.schema().neutral()
                }
                Decision::Failed(error) => {
                    self.record(|r| r.finish(None).map(drop));
                    return Err(EpisodeFailure::Policy(error));
                }
            };

            let step = match self.env.step(&action) {
                Ok(step) => step,
                Err(error) => {
                    self.record(|r| r.finish(None).map(drop));
                    return Err(error.into());
                }
            };
            self.record(|r| r.record(&step.observation));

            if step.done {
                let result = EpisodeResult {
                    success: step.info.success,
                    steps_taken: step.info.steps,
                    termination: step.info.termination,
                };
                self.record(|r| r.finish(Some(&result)).map(drop));
                return Ok(EpisodeOutcome::Finished { result, timeouts });
            }

            if self.ctx.stop.is_raised() {
                self.record(|r| r.finish(None).map(drop));
                return Ok(EpisodeOutcome::Cancelled { timeouts });
            }

            observation = step.observation;
        }
    }
}

impl BatchedEvaluator {
    pub fn new(
        config: EvalConfig,
        factory: EnvironmentFactory,
        policy: Arc<dyn PolicyClient>,
    ) -> Self {
        Self {
            config,
            factory,
            policy,
        }
    }

    pub fn run(&self, stop: &StopSignal) -> Result<EvalReport, EvalError> {
        self.config.validate()?;

        let prepared = self.factory.prepare(&self.config.env_name)?;
        let mut instances = Vec::with_capacity(self.config.n_envs);
        for _ in 0..self.config.n_envs {
            instances.push(self.factory.instantiate(&prepared)?);
        }

        tracing::info!(
            env_name = prepared.env_name.as_str(),
            n_envs = self.config.n_envs,
            n_episodes = self.config.n_episodes,
            seed = self.config.seed,
            "starting evaluation"
        );

        let tickets = AtomicUsize::new(0);
        let ctx = WorkerContext {
            config: &self.config,
            policy: &self.policy,
            tickets: &tickets,
            stop,
        };

        let outcomes: Vec<WorkerOutcome> = thread::scope(|scope| {
            let handles = instances
                .into_iter()
                .enumerate()
                .map(|(id, env)| {
                    let ctx = &ctx;
                    (id, scope.spawn(move || Worker::new(id, env, ctx).run()))
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().unwrap_or_else(|_| WorkerOutcome::panicked(id))
                })
                .collect()
        });

        let mut report = EvalReport {
            env_name: prepared.env_name.clone(),
            embodiment: prepared.layout.embodiment.clone(),
            n_envs: self.config.n_envs,
            requested_episodes: self.config.n_episodes,
            completed: 0,
            successes: 0,
            success_rate: 0.0,
            cancelled: 0,
            timeouts: 0,
            episodes: Vec::new(),
            faults: Vec::new(),
        };

        for outcome in outcomes {
            debug_assert!(outcome.records.iter().all(|r| r.worker == outcome.worker));
            report.episodes.extend(outcome.records);
            report.faults.extend(outcome.fault);
            report.cancelled += outcome.cancelled;
            report.timeouts += outcome.timeouts;
        }

        if !report.faults.is_empty() && report.faults.len() == self.config.n_envs {
            tracing::warn!(faults = report.faults.len(), "every worker retired");
            return Err(EvalError::BatchExhausted {
                faults: report.faults,
            });
        }

        report.completed = report.episodes.len();
        report.successes = report.episodes.iter().filter(|e| e.result.success).count();
        if report.completed > 0 {
            report.success_rate = report.successes as f64 / report.completed as f64;
        }

        tracing::info!(
            env_name = report.env_name.as_str(),
            completed = report.completed,
            successes = report.successes,
            success_rate = report.success_rate,
            cancelled = report.cancelled,
            timeouts = report.timeouts,
            faults = report.faults.len(),
            "evaluation finished"
        );

        Ok(report)
    }
}
