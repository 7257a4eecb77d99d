//! Fixtures and a scripted in-process executor for tests

use crate::{
    combination::{DatasetConfig, LOCAL_PATH},
    executors::{ExecutorError, Host, Payload, RemoteExecutor},
    manager::CombinationManager,
    space::ParameterSpace,
    stats::{StatsConfig, StatsManager},
    sweep::Sweeper,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{self, Write},
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct FailureRule {
    key: String,
    value: String,
    attempt: u32,
}

#[derive(Debug, Default)]
struct MockState {
    configurations: HashMap<Host, Payload>,
    attempts: HashMap<Payload, u32>,
    transfers: Vec<(Host, PathBuf, PathBuf)>,
    runs: usize,
    outputs: usize,
}

#[derive(Debug)]
/// Executor writing captured outputs into a local directory, failures are scripted per payload
pub struct MockExecutor {
    remote_dir: PathBuf,
    output_dir: PathBuf,
    fail_transfers: bool,
    rules: Vec<FailureRule>,
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            remote_dir: PathBuf::from("/tmp/remote"),
            output_dir: output_dir.to_path_buf(),
            fail_transfers: false,
            rules: Vec::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// fail the `attempt`-th run of every payload with `key=value`
    pub fn failing_on(mut self, key: &str, value: &str, attempt: u32) -> Self {
        self.rules.push(FailureRule {
            key: key.to_owned(),
            value: value.to_owned(),
            attempt,
        });

        self
    }

    pub fn failing_transfers(mut self) -> Self {
        self.fail_transfers = true;

        self
    }

    pub fn transfers(&self) -> Vec<(Host, PathBuf, PathBuf)> {
        self.state.lock().transfers.clone()
    }

    pub fn runs(&self) -> usize {
        self.state.lock().runs
    }

    pub fn last_configuration(&self, host: &Host) -> Option<Payload> {
        self.state.lock().configurations.get(host).cloned()
    }
}

impl RemoteExecutor for MockExecutor {
    fn remote_dir(&self) -> &Path {
        &self.remote_dir
    }

    fn push_configuration(&self, host: &Host, payload: &Payload) -> Result<(), ExecutorError> {
        self.state
            .lock()
            .configurations
            .insert(host.clone(), payload.clone());

        Ok(())
    }

    fn run_experiment(&self, host: &Host) -> Result<PathBuf, ExecutorError> {
        let mut state = self.state.lock();
        let payload = state.configurations.get(host).cloned().ok_or_else(|| {
            ExecutorError::Io(io::Error::new(io::ErrorKind::NotFound, "no configuration"))
        })?;

        state.runs += 1;
        let attempt = {
            let attempts = state.attempts.entry(payload.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };

        if self.rules.iter().any(|rule| {
            rule.attempt == attempt && payload.get(&rule.key).map(String::as_str) == Some(rule.value.as_str())
        }) {
            return Err(ExecutorError::Io(io::Error::new(
                io::ErrorKind::Other,
                "scripted failure",
            )));
        }

        state.outputs += 1;
        let path = self.output_dir.join(format!("out-{}", state.outputs));
        let mut file = File::create(&path)?;
        for (key, value) in payload.iter() {
            writeln!(file, "{key}={value}")?;
        }
        writeln!(file, "host={host}")?;
        writeln!(file, "attempt={attempt}")?;

        Ok(path)
    }

    fn push_file(&self, host: &Host, local: &Path, remote: &Path) -> Result<(), ExecutorError> {
        if self.fail_transfers {
            return Err(ExecutorError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "scripted transfer failure",
            )));
        }

        self.state
            .lock()
            .transfers
            .push((host.clone(), local.to_path_buf(), remote.to_path_buf()));

        Ok(())
    }
}

pub fn dataset(class: &str, local_path: &str) -> DatasetConfig {
    DatasetConfig::new(
        class,
        BTreeMap::from([(LOCAL_PATH.to_owned(), local_path.to_owned())]),
    )
}

fn parameters(parameters: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    parameters
        .iter()
        .map(|(name, values)| {
            (
                (*name).to_owned(),
                values.iter().map(|value| (*value).to_owned()).collect(),
            )
        })
        .collect()
}

pub fn space(
    datasets: Vec<DatasetConfig>,
    ds_parameters: &[(&str, &[&str])],
    xp_parameters: &[(&str, &[&str])],
) -> ParameterSpace {
    ParameterSpace::new(datasets, parameters(ds_parameters), parameters(xp_parameters))
        .expect("valid parameter space")
}

/// A fully wired sweep writing its statistics into a temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub manager: Arc<CombinationManager>,
    pub stats: Arc<StatsManager>,
    pub executor: Arc<MockExecutor>,
}

impl Fixture {
    pub fn new(
        space: ParameterSpace,
        repetitions: u32,
        executor: impl FnOnce(MockExecutor) -> MockExecutor,
    ) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        let outputs = dir.path().join("outputs");
        fs::create_dir_all(&outputs).expect("output directory");

        let stats = StatsManager::new(StatsConfig {
            stats_path: dir.path().join("stats"),
            summary_file: dir.path().join("summary.csv"),
            ds_summary_file: dir.path().join("ds-summary.csv"),
        });
        stats
            .initialize(&space.ds_parameter_names(), &space.xp_parameter_names())
            .expect("initialized statistics");

        let sweeper = Sweeper::new(space.combinations());
        let manager = CombinationManager::new(
            Arc::new(space),
            sweeper,
            NonZeroU32::new(repetitions).expect("at least one repetition"),
        );

        Self {
            executor: Arc::new(executor(MockExecutor::new(&outputs))),
            dir,
            manager: Arc::new(manager),
            stats: Arc::new(stats),
        }
    }

    pub fn sweeper(&self) -> &Sweeper {
        self.manager.sweeper()
    }

    pub fn summary_header(&self) -> Vec<String> {
        read_header(&self.dir.path().join("summary.csv"))
    }

    pub fn summary_rows(&self) -> Vec<Vec<String>> {
        read_rows(&self.dir.path().join("summary.csv"))
    }

    pub fn ds_summary_rows(&self) -> Vec<Vec<String>> {
        read_rows(&self.dir.path().join("ds-summary.csv"))
    }
}

pub fn read_header(path: &Path) -> Vec<String> {
    csv::Reader::from_path(path)
        .expect("readable summary")
        .headers()
        .expect("summary header")
        .iter()
        .map(str::to_owned)
        .collect()
}

pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    csv::Reader::from_path(path)
        .expect("readable summary")
        .records()
        .map(|record| {
            record
                .expect("valid summary row")
                .iter()
                .map(str::to_owned)
                .collect()
        })
        .collect()
}
