pub mod local;
pub mod ssh;

use crate::config::{CommandConfig, ExecutorConfig, TestConfig};
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use thiserror::Error;
use tracing::{debug, trace};

/// file name of the pushed configuration inside the remote directory
pub const PROPERTIES_FILE: &str = "properties.dat";

/// Key value configuration handed to the experiment binary
pub type Payload = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} failed with {status}: {stderr}")]
    Status {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// An acquired host, only its address is known to the runner
pub struct Host {
    pub address: String,
}

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// first label of the address, e.g. `node-3` for `node-3.cluster.example.org`
    pub fn label(&self) -> &str {
        self.address.split('.').next().unwrap_or(&self.address)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Transfer files to a host and run the experiment binary on it.
///
/// Implementations have to be usable from several workers at once, every call names the
/// host it targets.
pub trait RemoteExecutor: Send + Sync {
    /// directory on every host receiving datasets and the configuration
    fn remote_dir(&self) -> &Path;

    /// write the payload to the fixed configuration path on the host
    fn push_configuration(&self, host: &Host, payload: &Payload) -> Result<(), ExecutorError>;

    /// run the experiment against the last pushed configuration, returns the local path of the
    /// captured output
    fn run_experiment(&self, host: &Host) -> Result<PathBuf, ExecutorError>;

    fn push_file(&self, host: &Host, local: &Path, remote: &Path) -> Result<(), ExecutorError>;
}

#[derive(Debug)]
pub enum Executors {
    Ssh(ssh::SshExecutor),
    Local(local::LocalExecutor),
}

impl Executors {
    pub fn load(executor: &ExecutorConfig, test: &TestConfig) -> io::Result<Self> {
        Ok(match executor {
            ExecutorConfig::Ssh {
                user,
                ssh_options,
                command,
            } => Self::Ssh(ssh::SshExecutor::new(
                user.clone(),
                ssh_options.clone(),
                command.clone(),
                test.remote_dir.clone(),
            )),
            ExecutorConfig::Local { root, command } => Self::Local(local::LocalExecutor::new(
                root.clone(),
                command.clone(),
                test.remote_dir.clone(),
            )?),
        })
    }
}

impl RemoteExecutor for Executors {
    fn remote_dir(&self) -> &Path {
        match self {
            Self::Ssh(executor) => executor.remote_dir(),
            Self::Local(executor) => executor.remote_dir(),
        }
    }

    fn push_configuration(&self, host: &Host, payload: &Payload) -> Result<(), ExecutorError> {
        match self {
            Self::Ssh(executor) => executor.push_configuration(host, payload),
            Self::Local(executor) => executor.push_configuration(host, payload),
        }
    }

    fn run_experiment(&self, host: &Host) -> Result<PathBuf, ExecutorError> {
        match self {
            Self::Ssh(executor) => executor.run_experiment(host),
            Self::Local(executor) => executor.run_experiment(host),
        }
    }

    fn push_file(&self, host: &Host, local: &Path, remote: &Path) -> Result<(), ExecutorError> {
        match self {
            Self::Ssh(executor) => executor.push_file(host, local, remote),
            Self::Local(executor) => executor.push_file(host, local, remote),
        }
    }
}

/// write the payload as `key=value` lines
pub fn write_properties<W: Write>(mut writer: W, payload: &Payload) -> io::Result<()> {
    for (key, value) in payload.iter() {
        writeln!(writer, "{key}={value}")?;
    }

    writer.flush()
}

/// Run a command to completion, a non zero exit status is an error carrying stderr
pub(crate) fn run_command(command: &mut Command) -> Result<(), ExecutorError> {
    let description = describe(command);
    debug!(command = %description, "Running command");

    let output = command
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ExecutorError::Spawn {
            command: description.clone(),
            source,
        })?;

    if output.status.success() {
        trace!(command = %description, "Command finished");

        Ok(())
    } else {
        Err(ExecutorError::Status {
            command: description,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Run a command with stdout captured into a fresh local file, returns the path of that file
pub(crate) fn run_captured(command: &mut Command) -> Result<PathBuf, ExecutorError> {
    let (file, path) = tempfile::Builder::new()
        .prefix("sweep-out-")
        .tempfile()?
        .keep()
        .map_err(|error| error.error)?;

    match run_command(command.stdout(Stdio::from(file))) {
        Ok(()) => Ok(path),
        Err(error) => {
            if let Err(remove_error) = std::fs::remove_file(&path) {
                debug!(error = ?remove_error, "Failed to remove output of failed run");
            }

            Err(error)
        }
    }
}

/// full command line of the experiment for a given configuration path
pub(crate) fn experiment_args<'a>(
    command: &'a CommandConfig,
    properties: &'a Path,
) -> impl Iterator<Item = &'a std::ffi::OsStr> {
    std::iter::once(command.exec.as_os_str())
        .chain(command.params.iter().map(|param| std::ffi::OsStr::new(param.as_str())))
        .chain(std::iter::once(properties.as_os_str()))
}

fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
