use crate::{
    combination::{
        CombId, Combination, DatasetConfig, DatasetIndex, DS_CLASS_KEY, DS_CONFIG, DS_PATH_KEY,
    },
    executors::{ExecutorError, Host, Payload, RemoteExecutor},
    manager::CombinationManager,
    stats::{StatsError, StatsManager},
    sweep::SweepError,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};
use thiserror::Error;
use tracing::{debug, info, info_span, instrument, warn};

/// Errors that stop a worker, failures of single combinations never end up here
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Sweep invariant violated: {0}")]
    Sweep(#[from] SweepError),
    #[error("Failed to record statistics: {0}")]
    Stats(#[from] StatsError),
    #[error("Worker for {0} panicked")]
    Panicked(Host),
}

#[derive(Error, Debug)]
pub enum PreparationError {
    #[error("Dataset configuration {0} does not exist")]
    UnknownDataset(DatasetIndex),
    #[error("Dataset configuration {0} has no usable local_path")]
    MissingLocalPath(DatasetIndex),
    #[error("Failed to transfer dataset: {0}")]
    Transfer(#[from] ExecutorError),
}

#[derive(Debug)]
/// Result of running every repetition of one combination
pub enum ExecutionOutcome {
    /// all repetitions succeeded, `output` is the capture of the last one
    Completed { output: PathBuf, repetitions: u32 },
    /// `repetition` (1 based) failed, the remaining ones were skipped
    Failed { repetition: u32, error: ExecutorError },
}

#[derive(Debug, Clone)]
/// A dataset transferred to the worker's host, valid for consecutive same dataset combinations
pub struct PreparedDataset {
    pub ds_id: DatasetIndex,
    pub remote_path: PathBuf,
    payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub host: Host,
    pub done: usize,
    pub cancelled: usize,
    pub datasets_prepared: usize,
}

impl WorkerReport {
    fn new(host: Host) -> Self {
        Self {
            host,
            done: 0,
            cancelled: 0,
            datasets_prepared: 0,
        }
    }
}

#[derive(Debug)]
/// A single unit of execution bound to one host
pub struct Worker<E> {
    host: Host,
    manager: Arc<CombinationManager>,
    stats: Arc<StatsManager>,
    executor: Arc<E>,
}

#[derive(Debug)]
pub struct WorkerHandle {
    host: Host,
    handle: JoinHandle<Result<WorkerReport, WorkerError>>,
}

impl WorkerHandle {
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// wait for the worker to drain the sweep
    pub fn join(self) -> Result<WorkerReport, WorkerError> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(WorkerError::Panicked(self.host)))
    }
}

impl<E: RemoteExecutor + 'static> Worker<E> {
    pub fn new(
        host: Host,
        manager: Arc<CombinationManager>,
        stats: Arc<StatsManager>,
        executor: Arc<E>,
    ) -> Self {
        Self {
            host,
            manager,
            stats,
            executor,
        }
    }

    /// run the worker on its own thread named after the host
    pub fn start(self) -> io::Result<WorkerHandle> {
        let host = self.host.clone();
        let handle = thread::Builder::new()
            .name(format!("th_{}", host.label()))
            .spawn(move || self.run())?;

        Ok(WorkerHandle { host, handle })
    }

    /// Drain the sweep until no pending combination is left.
    ///
    /// Every combination claimed from the general queue prepares its dataset, afterwards the
    /// worker keeps claiming combinations sharing that dataset before returning to the general
    /// queue.
    pub fn run(&self) -> Result<WorkerReport, WorkerError> {
        let span = info_span!("worker", host = %self.host);
        let _enter = span.enter();
        let sweeper = self.manager.sweeper();
        let mut report = WorkerReport::new(self.host.clone());

        while let Some(combination) = sweeper.get_next() {
            let comb_id = self.manager.get_comb_id(&combination);

            let dataset = match self.prepare_dataset(&combination) {
                Ok(dataset) => dataset,
                Err(error) => {
                    warn!(comb_id = comb_id, error = %error, "Failed to prepare dataset, cancelling combination");
                    sweeper.cancel(&combination)?;
                    report.cancelled += 1;
                    info!("{} Remaining", sweeper.remaining());

                    continue;
                }
            };
            report.datasets_prepared += 1;

            if let Some(config) = self.manager.get_ds_class_params(&combination) {
                if let Err(error) = self.stats.add_ds(dataset.ds_id, config) {
                    sweeper.cancel(&combination)?;

                    return Err(error.into());
                }
            }

            self.resolve(comb_id, &combination, &dataset, &mut report)?;

            // subloop over the combinations that use the same dataset
            while let Some(next) = sweeper
                .get_next_filtered(|candidate| self.manager.uses_same_ds(&combination, candidate))
            {
                let next_id = self.manager.get_comb_id(&next);
                debug!(comb_id = next_id, "Reusing prepared dataset {}", dataset.ds_id);

                self.resolve(next_id, &next, &dataset, &mut report)?;
            }
        }

        info!(
            done = report.done,
            cancelled = report.cancelled,
            datasets = report.datasets_prepared,
            "No combinations left"
        );

        Ok(report)
    }

    /// Transfer the dataset of `combination` to the host
    #[instrument(skip_all, fields(ds_id = combination.ds_config()))]
    pub fn prepare_dataset(
        &self,
        combination: &Combination,
    ) -> Result<PreparedDataset, PreparationError> {
        let ds_id = self.manager.get_ds_id(combination);
        let config = self
            .manager
            .get_ds_class_params(combination)
            .ok_or(PreparationError::UnknownDataset(ds_id))?;
        let local_path = config
            .local_path()
            .map(Path::new)
            .ok_or(PreparationError::MissingLocalPath(ds_id))?;
        let file_name = local_path
            .file_name()
            .ok_or(PreparationError::MissingLocalPath(ds_id))?;
        let remote_path = self.executor.remote_dir().join(file_name);

        info!(
            "Prepare dataset with combination {}",
            self.manager.get_ds_parameters(combination)
        );
        self.executor.push_file(&self.host, local_path, &remote_path)?;

        Ok(PreparedDataset {
            ds_id,
            payload: dataset_payload(config, &remote_path),
            remote_path,
        })
    }

    /// Run every repetition of `combination` against the prepared dataset
    #[instrument(skip_all, fields(comb_id = comb_id))]
    pub fn execute(
        &self,
        comb_id: CombId,
        combination: &Combination,
        dataset: &PreparedDataset,
    ) -> ExecutionOutcome {
        info!(
            "Execute experiment with combination {}",
            self.manager.get_xp_parameters(combination)
        );

        let repetitions = self.manager.get_num_repetitions();
        let payload = merge_payload(combination, dataset);
        let mut output: Option<PathBuf> = None;

        for repetition in 1..=repetitions {
            if repetitions > 1 {
                info!("Repetition {repetition}");
            }

            let result = self
                .executor
                .push_configuration(&self.host, &payload)
                .and_then(|()| self.executor.run_experiment(&self.host));

            match result {
                Ok(path) => {
                    if let Some(previous) = output.replace(path) {
                        discard_output(&previous);
                    }
                }
                Err(error) => {
                    if let Some(previous) = output.take() {
                        discard_output(&previous);
                    }

                    return ExecutionOutcome::Failed { repetition, error };
                }
            }
        }

        match output {
            Some(output) => ExecutionOutcome::Completed {
                output,
                repetitions,
            },
            // the manager never configures less than one repetition
            None => ExecutionOutcome::Failed {
                repetition: 0,
                error: ExecutorError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no repetition was executed",
                )),
            },
        }
    }

    /// execute a claimed combination and commit its final state
    fn resolve(
        &self,
        comb_id: CombId,
        combination: &Combination,
        dataset: &PreparedDataset,
        report: &mut WorkerReport,
    ) -> Result<(), WorkerError> {
        let sweeper = self.manager.sweeper();

        match self.execute(comb_id, combination, dataset) {
            ExecutionOutcome::Completed {
                output,
                repetitions,
            } => {
                debug!(
                    comb_id = comb_id,
                    repetitions = repetitions,
                    "Experiment completed, recording last repetition"
                );
                let recorded = self.stats.add_combination(comb_id, combination, &output);
                discard_output(&output);

                if let Err(error) = recorded {
                    sweeper.cancel(combination)?;

                    return Err(error.into());
                }

                sweeper.done(combination)?;
                report.done += 1;
            }
            ExecutionOutcome::Failed { repetition, error } => {
                warn!(
                    comb_id = comb_id,
                    repetition = repetition,
                    error = %error,
                    "Experiment failed, cancelling combination"
                );
                sweeper.cancel(combination)?;
                report.cancelled += 1;
            }
        }

        info!("{} Remaining", sweeper.remaining());

        Ok(())
    }
}

/// configuration entries describing the prepared dataset
fn dataset_payload(config: &DatasetConfig, remote_path: &Path) -> Payload {
    Payload::from([
        (DS_CLASS_KEY.to_owned(), config.class.clone()),
        (
            DS_PATH_KEY.to_owned(),
            remote_path.to_string_lossy().into_owned(),
        ),
    ])
}

/// every parameter of the combination, overridden by the prepared dataset entries
fn merge_payload(combination: &Combination, dataset: &PreparedDataset) -> Payload {
    let mut payload = combination
        .values()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect::<Payload>();
    payload.insert(DS_CONFIG.to_owned(), combination.ds_config().to_string());
    payload.extend(dataset.payload.clone());

    payload
}

fn discard_output(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        debug!(error = ?error, path = %path.to_string_lossy(), "Failed to remove captured output");
    }
}
