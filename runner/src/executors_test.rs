use crate::{
    config::CommandConfig,
    executors::{local::LocalExecutor, write_properties, ExecutorError, Host, Payload, RemoteExecutor},
};
use std::{fs, path::PathBuf};

fn payload() -> Payload {
    Payload::from([
        ("A".to_owned(), "1".to_owned()),
        ("ds.class".to_owned(), "Csv".to_owned()),
    ])
}

fn local(root: PathBuf, exec: &str) -> LocalExecutor {
    LocalExecutor::new(
        root,
        CommandConfig {
            exec: PathBuf::from(exec),
            params: Vec::new(),
        },
        PathBuf::from("/tmp/sweep"),
    )
    .unwrap()
}

#[test]
pub fn host_label_is_the_first_address_part() {
    assert_eq!(Host::new("node-3.cluster.example.org").label(), "node-3");
    assert_eq!(Host::new("localhost").label(), "localhost");
}

#[test]
pub fn properties_are_key_value_lines() {
    let mut buffer = Vec::new();

    write_properties(&mut buffer, &payload()).unwrap();

    assert_eq!(String::from_utf8(buffer).unwrap(), "A=1\nds.class=Csv\n");
}

#[test]
pub fn local_hosts_are_mirrored_below_root() {
    let dir = tempfile::tempdir().unwrap();
    let executor = local(dir.path().to_path_buf(), "cat");
    let host = Host::new("node-1");

    assert_eq!(
        executor.host_path(&host, &PathBuf::from("/tmp/sweep/a.csv")),
        dir.path().join("node-1").join("tmp").join("sweep").join("a.csv")
    );

    let source = dir.path().join("a.csv");
    fs::write(&source, "1,2,3\n").unwrap();
    executor
        .push_file(&host, &source, &PathBuf::from("/tmp/sweep/a.csv"))
        .unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("node-1/tmp/sweep/a.csv")).unwrap(),
        "1,2,3\n"
    );
}

#[test]
pub fn local_experiment_output_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let executor = local(dir.path().to_path_buf(), "cat");
    let host = Host::new("node-1");

    executor.push_configuration(&host, &payload()).unwrap();
    let output = executor.run_experiment(&host).unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), "A=1\nds.class=Csv\n");
    fs::remove_file(output).unwrap();
}

#[test]
pub fn relative_root_is_resolved_before_running() {
    let dir = tempfile::tempdir_in(".").unwrap();
    let relative = PathBuf::from(dir.path().file_name().unwrap());
    assert!(relative.is_relative());
    let executor = local(relative, "cat");
    let host = Host::new("node-1");

    let mirrored = executor.host_path(&host, &PathBuf::from("/tmp/sweep/a.csv"));
    assert!(mirrored.is_absolute());
    assert!(mirrored.starts_with(dir.path()));

    executor.push_configuration(&host, &payload()).unwrap();
    let output = executor.run_experiment(&host).unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), "A=1\nds.class=Csv\n");
    fs::remove_file(output).unwrap();
}

#[test]
pub fn failing_experiment_reports_its_status() {
    let dir = tempfile::tempdir().unwrap();
    let executor = local(dir.path().to_path_buf(), "false");
    let host = Host::new("node-1");

    executor.push_configuration(&host, &payload()).unwrap();

    assert!(matches!(
        executor.run_experiment(&host),
        Err(ExecutorError::Status { .. })
    ));
}

#[test]
pub fn missing_binary_fails_to_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let executor = local(dir.path().to_path_buf(), "/does/not/exist");
    let host = Host::new("node-1");

    executor.push_configuration(&host, &payload()).unwrap();

    assert!(matches!(
        executor.run_experiment(&host),
        Err(ExecutorError::Spawn { .. })
    ));
}
