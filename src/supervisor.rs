//! The supervisor: owns the live dispatcher pool, reconciles it against the
//! configured target size, and reacts to the control row (`spec.md` §4.3).
//!
//! Grounded on the teacher's service-loop shape (`kernel/jobs/runner.rs`)
//! combined with `tokio::task::JoinSet` to own dispatcher handles directly,
//! recovering structured concurrency per the Design Note in `spec.md` §9 --
//! replacing the original's ad-hoc `app.start_task` bookkeeping with a single
//! owned set of task handles the supervisor can reap and log from on every
//! tick.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::dispatcher::{Dispatcher, CONTROL_TICK};
use crate::error::AsdbJobsError;
use crate::handler::HandlerDeps;
use crate::models::control::{Control, ControlGateway};
use crate::models::job::JobQueue;
use crate::version::full_version;

/// Owns the dispatcher pool for one runner process.
pub struct Supervisor {
    config: Arc<RunConfig>,
    control: Arc<ControlGateway>,
    queue: Arc<JobQueue>,
    deps: Arc<HandlerDeps>,
}

impl Supervisor {
    pub fn new(
        config: Arc<RunConfig>,
        control: Arc<ControlGateway>,
        queue: Arc<JobQueue>,
        deps: Arc<HandlerDeps>,
    ) -> Self {
        Self {
            config,
            control,
            queue,
            deps,
        }
    }

    /// Run this runner until a drain completes, then delete its control row
    /// and return.
    ///
    /// Per `spec.md` §4.3: upsert the control row at startup, then loop
    /// fetch-control / grow-pool / sleep / check-drained; on clean exit,
    /// delete the control row. The control row is always deleted even if the
    /// loop exits via an error path, matching the "delete on clean exit"
    /// contract as closely as a fallible teardown allows.
    pub async fn run(&self) -> Result<(), AsdbJobsError> {
        let name = &self.config.startup.name;
        let control = Control {
            name: name.clone(),
            status: "running".to_string(),
            stop_scheduled: false,
            version: full_version(),
        };
        self.control.upsert(&control).await?;
        info!(runner = %name, version = %control.version, "supervisor started");

        let result = self.run_loop().await;

        if let Err(err) = self.control.delete(name).await {
            error!(runner = %name, error = %err, "failed to delete control row on exit");
        }
        info!(runner = %name, "supervisor exited");

        result
    }

    async fn run_loop(&self) -> Result<(), AsdbJobsError> {
        let name = self.config.startup.name.clone();
        let mut dispatchers: JoinSet<Result<(), AsdbJobsError>> = JoinSet::new();

        loop {
            match self.control.fetch(&name).await {
                Ok(row) if row.stop_scheduled => {
                    info!(runner = %name, "stop_scheduled set, draining pool");
                    self.config.set_max_jobs(0);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(runner = %name, error = %err, "failed to fetch control row this tick");
                }
            }

            // `want_more_jobs`/`running_jobs` can't change partway through
            // this loop -- nothing else runs until the next await point --
            // so the spawn count is computed once up front rather than
            // re-checked per iteration. `RunConfig::up()` only increments
            // `running_jobs` from inside the spawned dispatcher's own task
            // body, so a condition re-read here would never observe it and
            // this would spawn dispatchers without bound.
            let to_spawn = (self.config.max_jobs() - self.config.running_jobs()).max(0);
            for _ in 0..to_spawn {
                let dispatcher = Dispatcher::new(self.config.clone(), self.queue.clone(), self.deps.clone());
                dispatchers.spawn(dispatcher.run());
            }

            tokio::time::sleep(CONTROL_TICK).await;

            while let Some(joined) = dispatchers.try_join_next() {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(runner = %name, error = %err, "dispatcher aborted"),
                    Err(join_err) => error!(runner = %name, error = %join_err, "dispatcher task panicked"),
                }
            }

            if self.config.running_jobs() == 0 && !self.config.want_more_jobs() {
                break;
            }
        }

        dispatchers.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ReloadableConfig, StartupConfig};
    use std::path::PathBuf;

    fn bare_config(max_jobs: i64) -> Arc<RunConfig> {
        Arc::new(RunConfig::new(
            StartupConfig {
                configfile: PathBuf::from("unused.toml"),
                db_dir: PathBuf::from("."),
                name: "test-runner".into(),
                workdir: PathBuf::from("."),
                database: DatabaseConfig::default(),
            },
            ReloadableConfig { cpus: 1, max_jobs },
        ))
    }

    #[test]
    fn drain_condition_is_zero_running_and_zero_target() {
        let config = bare_config(4);
        config.set_max_jobs(0);
        assert!(config.running_jobs() == 0 && !config.want_more_jobs());

        config.up();
        assert!(!(config.running_jobs() == 0 && !config.want_more_jobs()));
    }
}
