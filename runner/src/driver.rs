use crate::{
    executors::{Host, RemoteExecutor},
    manager::CombinationManager,
    stats::{StatsError, StatsManager},
    sweep::SweepCounts,
    worker::{Worker, WorkerError, WorkerReport},
};
use itertools::Itertools;
use rayon::prelude::*;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No usable host left after preparation")]
    NoHosts,
    #[error("Failed to start worker for {host}: {source}")]
    Spawn {
        host: Host,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker for {host} failed: {source}")]
    Worker {
        host: Host,
        #[source]
        source: WorkerError,
    },
    #[error("Failed to close statistics: {0}")]
    Stats(#[from] StatsError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub reports: Vec<WorkerReport>,
    pub counts: SweepCounts,
}

#[derive(Debug)]
/// Starts one worker per host on a shared sweep and closes the statistics once all finished
pub struct Driver<E> {
    manager: Arc<CombinationManager>,
    stats: Arc<StatsManager>,
    executor: Arc<E>,
    artifacts: Vec<PathBuf>,
}

impl<E: RemoteExecutor + 'static> Driver<E> {
    pub fn new(
        manager: Arc<CombinationManager>,
        stats: Arc<StatsManager>,
        executor: Arc<E>,
        artifacts: Vec<PathBuf>,
    ) -> Self {
        Self {
            manager,
            stats,
            executor,
            artifacts,
        }
    }

    /// Deduplicate hosts and push every artifact to each of them.
    ///
    /// Hosts that fail to receive an artifact are dropped.
    #[instrument(skip_all, fields(hosts = hosts.len()))]
    pub fn prepare_hosts(&self, hosts: Vec<Host>) -> Vec<Host> {
        let hosts = hosts.into_iter().unique().collect_vec();

        if self.artifacts.is_empty() {
            return hosts;
        }

        let remote_dir = self.executor.remote_dir();

        hosts
            .into_par_iter()
            .filter(|host| {
                self.artifacts.iter().all(|artifact| {
                    let remote = match artifact.file_name() {
                        Some(name) => remote_dir.join(name),
                        None => {
                            error!(artifact = ?artifact, "Artifact has no file name");
                            return false;
                        }
                    };

                    match self.executor.push_file(host, artifact, &remote) {
                        Ok(()) => true,
                        Err(error) => {
                            error!(host = %host, error = %error, "Failed to push artifact, dropping host");
                            false
                        }
                    }
                })
            })
            .collect()
    }

    /// Run the sweep on the given hosts until no combination is pending.
    ///
    /// The statistics are closed on every path out of this function.
    #[instrument(skip_all, level = "info")]
    pub fn run(&self, hosts: Vec<Host>) -> Result<SweepSummary, DriverError> {
        let result = self.run_workers(hosts);
        let closed = self.stats.close();

        let summary = result?;
        closed?;

        Ok(summary)
    }

    fn run_workers(&self, hosts: Vec<Host>) -> Result<SweepSummary, DriverError> {
        let sweeper = self.manager.sweeper();

        if sweeper.remaining() == 0 {
            info!("No combination left to run");

            return Ok(SweepSummary {
                reports: Vec::new(),
                counts: sweeper.counts(),
            });
        }

        let hosts = self.prepare_hosts(hosts);
        if hosts.is_empty() {
            return Err(DriverError::NoHosts);
        }
        info!("Setup finished in hosts {}", hosts.iter().join(", "));

        let mut handles = Vec::with_capacity(hosts.len());
        let mut failure = None;

        for host in hosts {
            let worker = Worker::new(
                host.clone(),
                self.manager.clone(),
                self.stats.clone(),
                self.executor.clone(),
            );

            match worker.start() {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    error!(host = %host, error = %source, "Failed to start worker");
                    failure.get_or_insert(DriverError::Spawn { host, source });
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let host = handle.host().clone();

            match handle.join() {
                Ok(report) => reports.push(report),
                Err(source) => {
                    error!(host = %host, error = %source, "Worker stopped");
                    failure.get_or_insert(DriverError::Worker { host, source });
                }
            }
        }

        let counts = sweeper.counts();
        info!(
            done = counts.done,
            cancelled = counts.cancelled,
            pending = counts.pending,
            "Sweep finished with {} Remaining",
            counts.pending
        );
        if counts.cancelled > 0 {
            warn!(
                "{} combination(s) were cancelled and have no summary row",
                counts.cancelled
            );
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(SweepSummary { reports, counts }),
        }
    }
}
