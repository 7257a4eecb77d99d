use super::{
    run_captured, write_properties, ExecutorError, Host, Payload, RemoteExecutor,
    PROPERTIES_FILE,
};
use crate::config::CommandConfig;
use std::{
    env,
    fs::{self, File},
    io::{self, BufWriter},
    path::{Component, Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

#[derive(Debug)]
/// Executor that mirrors every host as a directory below `root` and runs experiments locally.
///
/// Useful to dry run a sweep on a single machine before reserving nodes.
pub struct LocalExecutor {
    root: PathBuf,
    command: CommandConfig,
    remote_dir: PathBuf,
    props_path: PathBuf,
}

impl LocalExecutor {
    /// A relative `root` is resolved against the current directory, experiments run inside
    /// their host directory and have to find the configuration from there.
    pub fn new(root: PathBuf, command: CommandConfig, remote_dir: PathBuf) -> io::Result<Self> {
        let root = if root.is_absolute() {
            root
        } else {
            env::current_dir()?.join(root)
        };

        Ok(Self {
            root,
            command,
            props_path: remote_dir.join(PROPERTIES_FILE),
            remote_dir,
        })
    }

    /// map a path on the host to its local mirror
    pub fn host_path(&self, host: &Host, remote: &Path) -> PathBuf {
        remote
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .fold(self.root.join(&host.address), |path, component| {
                path.join(component)
            })
    }

    fn create_parent(path: &Path) -> Result<(), ExecutorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(())
    }
}

impl RemoteExecutor for LocalExecutor {
    fn remote_dir(&self) -> &Path {
        &self.remote_dir
    }

    #[instrument(skip(self, payload), level = "debug")]
    fn push_configuration(&self, host: &Host, payload: &Payload) -> Result<(), ExecutorError> {
        let target = self.host_path(host, &self.props_path);
        Self::create_parent(&target)?;

        write_properties(BufWriter::new(File::create(&target)?), payload)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn run_experiment(&self, host: &Host) -> Result<PathBuf, ExecutorError> {
        let properties = self.host_path(host, &self.props_path);
        let working_dir = self.host_path(host, &self.remote_dir);
        Self::create_parent(&properties)?;

        let mut command = Command::new(&self.command.exec);
        command
            .args(self.command.params.iter())
            .arg(&properties)
            .current_dir(working_dir);

        let output = run_captured(&mut command)?;
        debug!(output = %output.to_string_lossy(), "Captured experiment output");

        Ok(output)
    }

    #[instrument(skip(self), level = "debug")]
    fn push_file(&self, host: &Host, local: &Path, remote: &Path) -> Result<(), ExecutorError> {
        let target = self.host_path(host, remote);
        Self::create_parent(&target)?;

        fs::copy(local, &target)?;

        Ok(())
    }
}
