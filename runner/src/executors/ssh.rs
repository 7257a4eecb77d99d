use super::{
    experiment_args, run_captured, run_command, write_properties, ExecutorError, Host, Payload,
    RemoteExecutor, PROPERTIES_FILE,
};
use crate::config::CommandConfig;
use std::{
    io::BufWriter,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

#[derive(Debug)]
/// Executor reaching hosts with `ssh` and `scp`
pub struct SshExecutor {
    user: Option<String>,
    ssh_options: Vec<String>,
    command: CommandConfig,
    remote_dir: PathBuf,
    props_path: PathBuf,
}

impl SshExecutor {
    pub fn new(
        user: Option<String>,
        ssh_options: Vec<String>,
        command: CommandConfig,
        remote_dir: PathBuf,
    ) -> Self {
        Self {
            user,
            ssh_options,
            command,
            props_path: remote_dir.join(PROPERTIES_FILE),
            remote_dir,
        }
    }

    fn destination(&self, host: &Host) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", host.address),
            None => host.address.clone(),
        }
    }
}

impl RemoteExecutor for SshExecutor {
    fn remote_dir(&self) -> &Path {
        &self.remote_dir
    }

    #[instrument(skip(self, payload), level = "debug")]
    fn push_configuration(&self, host: &Host, payload: &Payload) -> Result<(), ExecutorError> {
        // the local copy is removed once `properties` is dropped
        let properties = tempfile::Builder::new()
            .prefix("sweep-conf-")
            .tempfile()?;
        write_properties(BufWriter::new(properties.as_file()), payload)?;

        self.push_file(host, properties.path(), &self.props_path)
    }

    #[instrument(skip(self), level = "debug")]
    fn run_experiment(&self, host: &Host) -> Result<PathBuf, ExecutorError> {
        let mut command = Command::new("ssh");
        command
            .args(self.ssh_options.iter())
            .arg(self.destination(host))
            .args(experiment_args(&self.command, &self.props_path));

        let output = run_captured(&mut command)?;
        debug!(output = %output.to_string_lossy(), "Captured experiment output");

        Ok(output)
    }

    #[instrument(skip(self), level = "debug")]
    fn push_file(&self, host: &Host, local: &Path, remote: &Path) -> Result<(), ExecutorError> {
        let mut target = self.destination(host);
        target.push(':');
        target.push_str(&remote.to_string_lossy());

        run_command(
            Command::new("scp")
                .args(self.ssh_options.iter())
                .arg("-q")
                .arg(local)
                .arg(target),
        )
    }
}
