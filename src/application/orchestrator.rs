//! Pipeline orchestrator.
//!
//! Holds the stage registry as a dependency graph with per-edge max
//! staleness, validated acyclic at registration time. Each invocation
//! claims the stage's single-flight lock in the `pipeline_runs` table,
//! checks upstream freshness, executes under a wall-clock budget, and
//! resolves the terminal status. The orchestrator is re-entrant across
//! cycles, not a long-lived process; all state lives in the store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::application::run_report::RunReport;
use crate::application::stages::{PipelineStage, StageContext, StageError};
use crate::domain::entities::pipeline_run::StageStatus;
use crate::domain::errors::ConfigError;
use crate::persistence::pipeline_repository::PipelineRepository;
use crate::persistence::DbPool;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Minimum processed fraction for a run to count as SUCCESS.
    pub min_success_fraction: f64,
    /// Wall-clock budget per stage execution.
    pub stage_budget: Duration,
    /// Age at which an abandoned single-flight lock becomes reclaimable.
    pub lock_ttl: chrono::Duration,
    /// Identity recorded as the lock holder.
    pub runner_id: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_success_fraction: 0.8,
            stage_budget: Duration::from_secs(900),
            lock_ttl: chrono::Duration::minutes(30),
            runner_id: format!("mizani-{}", std::process::id()),
        }
    }
}

/// Per-invocation parameters from the trigger surface.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub as_of: NaiveDate,
    pub batch_size: usize,
    pub symbol_filter: Option<Vec<String>>,
    /// Skip the dependency staleness gate (never the single-flight lock).
    pub force: bool,
}

impl RunParams {
    pub fn new(as_of: NaiveDate) -> Self {
        RunParams {
            as_of,
            batch_size: 500,
            symbol_filter: None,
            force: false,
        }
    }
}

pub struct Orchestrator {
    pool: DbPool,
    settings: OrchestratorSettings,
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl Orchestrator {
    pub fn new(pool: DbPool, settings: OrchestratorSettings) -> Self {
        Orchestrator {
            pool,
            settings,
            stages: Vec::new(),
        }
    }

    /// Register a stage. Names must be unique; the full graph is validated
    /// by [`validate`](Self::validate).
    pub fn register(&mut self, stage: Arc<dyn PipelineStage>) -> Result<(), ConfigError> {
        if self.stages.iter().any(|s| s.name() == stage.name()) {
            return Err(ConfigError::DuplicateStage(stage.name().to_string()));
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    fn find(&self, name: &str) -> Result<&Arc<dyn PipelineStage>, ConfigError> {
        self.stages
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| ConfigError::UnknownStage(name.to_string()))
    }

    /// Check that every declared dependency is a registered stage and that
    /// the graph is acyclic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm over the registered stages, dependencies first.
    pub fn topological_order(&self) -> Result<Vec<Arc<dyn PipelineStage>>, ConfigError> {
        let index: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name(), i))
            .collect();

        let mut in_degree = vec![0usize; self.stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];

        for (i, stage) in self.stages.iter().enumerate() {
            for dep in stage.dependencies() {
                let j = *index
                    .get(dep.stage)
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        stage: stage.name().to_string(),
                        dependency: dep.stage.to_string(),
                    })?;
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.stages.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());

        while let Some(i) = queue.pop_front() {
            order.push(self.stages[i].clone());
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }

        if order.len() != self.stages.len() {
            let stuck = self
                .stages
                .iter()
                .enumerate()
                .find(|(i, _)| in_degree[*i] > 0)
                .map(|(_, s)| s.name().to_string())
                .unwrap_or_default();
            return Err(ConfigError::DependencyCycle(stuck));
        }

        Ok(order)
    }

    /// Run one stage through the full gate-execute-resolve protocol.
    ///
    /// Stage execution errors resolve to a FAILED report rather than
    /// propagating; only registry and state-table errors surface as `Err`.
    pub async fn run_stage(
        &self,
        name: &str,
        params: &RunParams,
    ) -> Result<RunReport, StageError> {
        let stage = self.find(name)?;
        self.validate()?;

        let repo = PipelineRepository::new(self.pool.clone());
        let dependencies = stage.dependencies();
        let dependency_names: Vec<String> =
            dependencies.iter().map(|d| d.stage.to_string()).collect();
        repo.register(name, &dependency_names).await?;

        // Single-flight: exactly one execution per stage at a time.
        if !repo
            .try_claim(name, &self.settings.runner_id, self.settings.lock_ttl)
            .await?
        {
            info!(stage = name, "Single-flight lock held, not running");
            return Ok(RunReport::blocked(
                name,
                "single-flight lock held by another execution",
            ));
        }

        // Staleness gate over every declared dependency edge.
        if !params.force {
            for dep in &dependencies {
                let last_success = repo.last_success_at(dep.stage).await?;
                let reason = match last_success {
                    None => Some(format!("dependency {} has never succeeded", dep.stage)),
                    Some(at) => {
                        let age = Utc::now() - at;
                        match chrono::Duration::from_std(dep.max_staleness) {
                            Ok(max_age) if age > max_age => Some(format!(
                                "dependency {} is stale ({}s old, max {}s)",
                                dep.stage,
                                age.num_seconds(),
                                dep.max_staleness.as_secs()
                            )),
                            _ => None,
                        }
                    }
                };

                if let Some(reason) = reason {
                    info!(stage = name, reason = %reason, "Stage blocked");
                    repo.release(name, &self.settings.runner_id, StageStatus::Blocked, None)
                        .await?;
                    return Ok(RunReport::blocked(name, reason));
                }
            }
        }

        let ctx = StageContext {
            pool: self.pool.clone(),
            as_of: params.as_of,
            batch_size: params.batch_size,
            symbol_filter: params.symbol_filter.clone(),
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(stage = name, as_of = %params.as_of, "Stage starting");

        let execution = timeout(self.settings.stage_budget, stage.execute(&ctx)).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let report = match execution {
            // Budget exceeded: committed batches stay committed, the rest
            // retries next cycle.
            Err(_) => {
                warn!(
                    stage = name,
                    budget_secs = self.settings.stage_budget.as_secs(),
                    "Stage exceeded wall-clock budget"
                );
                repo.release(name, &self.settings.runner_id, StageStatus::Partial, None)
                    .await?;
                RunReport {
                    stage: name.to_string(),
                    status: StageStatus::Partial,
                    symbols_processed: 0,
                    symbols_skipped: Vec::new(),
                    started_at,
                    duration_ms,
                    message: Some(
                        "wall-clock budget exceeded; committed batches retained".to_string(),
                    ),
                }
            }
            Ok(Err(e)) => {
                error!(stage = name, error = %e, "Stage failed");
                repo.release(name, &self.settings.runner_id, StageStatus::Failed, None)
                    .await?;
                RunReport {
                    stage: name.to_string(),
                    status: StageStatus::Failed,
                    symbols_processed: 0,
                    symbols_skipped: Vec::new(),
                    started_at,
                    duration_ms,
                    message: Some(e.to_string()),
                }
            }
            Ok(Ok(outcome)) => {
                let attempted = outcome.processed + outcome.skipped.len();
                let fraction = if attempted == 0 {
                    1.0
                } else {
                    outcome.processed as f64 / attempted as f64
                };
                let status = if fraction >= self.settings.min_success_fraction {
                    StageStatus::Success
                } else {
                    StageStatus::Partial
                };
                let advance = match status {
                    StageStatus::Success => Some(Utc::now()),
                    _ => None,
                };
                repo.release(name, &self.settings.runner_id, status, advance)
                    .await?;

                info!(
                    stage = name,
                    status = status.as_str(),
                    processed = outcome.processed,
                    skipped = outcome.skipped.len(),
                    duration_ms = duration_ms,
                    "Stage finished"
                );

                RunReport {
                    stage: name.to_string(),
                    status,
                    symbols_processed: outcome.processed,
                    symbols_skipped: outcome.skipped,
                    started_at,
                    duration_ms,
                    message: outcome.message,
                }
            }
        };

        Ok(report)
    }

    /// Run every registered stage once, in dependency order. Blocked stages
    /// are skipped for the cycle, not errors; the next cycle retries them.
    pub async fn run_cycle(&self, params: &RunParams) -> Result<Vec<RunReport>, StageError> {
        let order = self.topological_order()?;
        let mut reports = Vec::with_capacity(order.len());
        for stage in order {
            let report = self.run_stage(stage.name(), params).await?;
            reports.push(report);
        }
        Ok(reports)
    }
}
