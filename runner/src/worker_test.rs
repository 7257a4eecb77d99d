use crate::{
    combination::{DS_CLASS_KEY, DS_CONFIG, DS_PATH_KEY},
    executors::Host,
    sweep::SweepState,
    testing::{dataset, space, Fixture, MockExecutor},
    worker::{ExecutionOutcome, Worker},
};
use std::{collections::HashSet, fs, path::PathBuf};

fn worker(fixture: &Fixture) -> Worker<MockExecutor> {
    Worker::new(
        Host::new("node-1.cluster"),
        fixture.manager.clone(),
        fixture.stats.clone(),
        fixture.executor.clone(),
    )
}

fn single_dataset(
    repetitions: u32,
    executor: impl FnOnce(MockExecutor) -> MockExecutor,
) -> Fixture {
    Fixture::new(
        space(
            vec![dataset("Csv", "/data/a.csv")],
            &[],
            &[("A", &["1", "2"])],
        ),
        repetitions,
        executor,
    )
}

#[test]
pub fn same_dataset_is_prepared_once() {
    let fixture = single_dataset(1, |executor| executor);

    let report = worker(&fixture).run().unwrap();

    assert_eq!(report.done, 2);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.datasets_prepared, 1);
    assert_eq!(
        fixture.executor.transfers(),
        vec![(
            Host::new("node-1.cluster"),
            PathBuf::from("/data/a.csv"),
            PathBuf::from("/tmp/remote/a.csv"),
        )]
    );

    let rows = fixture.summary_rows();
    assert_eq!(rows.len(), 2);
    // the reusing combination is attributed its own id
    let ids = rows.iter().map(|row| row[0].as_str()).collect::<HashSet<_>>();
    assert_eq!(ids, HashSet::from(["0", "1"]));
    assert_eq!(fixture.ds_summary_rows().len(), 1);
    assert_eq!(fixture.sweeper().remaining(), 0);
}

#[test]
pub fn payload_carries_prepared_dataset() {
    let fixture = Fixture::new(
        space(
            vec![dataset("Csv", "/data/a.csv")],
            &[("ds.size", &["10"])],
            &[("A", &["1"])],
        ),
        1,
        |executor| executor,
    );

    worker(&fixture).run().unwrap();

    let payload = fixture
        .executor
        .last_configuration(&Host::new("node-1.cluster"))
        .unwrap();
    assert_eq!(payload[DS_CLASS_KEY], "Csv");
    assert_eq!(payload[DS_PATH_KEY], "/tmp/remote/a.csv");
    assert_eq!(payload[DS_CONFIG], "0");
    assert_eq!(payload["ds.size"], "10");
    assert_eq!(payload["A"], "1");
}

#[test]
pub fn failed_repetition_cancels_the_combination() {
    let fixture = single_dataset(3, |executor| executor.failing_on("A", "1", 2));

    let report = worker(&fixture).run().unwrap();

    assert_eq!(report.done, 1);
    assert_eq!(report.cancelled, 1);
    // two runs for the failed combination, three for the other one
    assert_eq!(fixture.executor.runs(), 5);

    let rows = fixture.summary_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(fixture.summary_header()[2], "A");
    assert_eq!(rows[0][2], "2");
}

#[test]
pub fn failed_transfer_cancels_without_dataset_row() {
    let fixture = single_dataset(1, MockExecutor::failing_transfers);

    let report = worker(&fixture).run().unwrap();

    assert_eq!(report.done, 0);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.datasets_prepared, 0);
    assert_eq!(fixture.executor.runs(), 0);
    assert!(fixture.summary_rows().is_empty());
    assert!(fixture.ds_summary_rows().is_empty());
    assert_eq!(fixture.sweeper().counts().cancelled, 2);
}

#[test]
pub fn only_the_last_repetition_is_recorded() {
    let fixture = Fixture::new(
        space(vec![dataset("Csv", "/data/a.csv")], &[], &[("A", &["1"])]),
        3,
        |executor| executor,
    );

    worker(&fixture).run().unwrap();

    let rows = fixture.summary_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(fixture.executor.runs(), 3);

    let captured = fs::read_to_string(fixture.stats.output_path(0)).unwrap();
    assert!(captured.contains("attempt=3"));
    assert!(captured.contains("host=node-1.cluster"));

    // superseded and copied captures are removed
    let leftovers = fs::read_dir(fixture.dir.path().join("outputs")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
pub fn execute_reports_the_failing_repetition() {
    let fixture = single_dataset(3, |executor| executor.failing_on("A", "2", 3));
    let worker = worker(&fixture);
    let combination = fixture
        .sweeper()
        .get_next_filtered(|candidate| candidate.get("A").as_deref() == Some("2"))
        .unwrap();

    let dataset = worker.prepare_dataset(&combination).unwrap();
    match worker.execute(0, &combination, &dataset) {
        ExecutionOutcome::Failed { repetition, .. } => assert_eq!(repetition, 3),
        other => panic!("expected a failed execution, got {other:?}"),
    }

    assert_eq!(
        fixture.sweeper().state(&combination),
        Some(SweepState::InProgress)
    );
}

#[test]
pub fn execute_reports_every_completed_repetition() {
    let fixture = single_dataset(3, |executor| executor);
    let worker = worker(&fixture);
    let combination = fixture.sweeper().get_next().unwrap();

    let dataset = worker.prepare_dataset(&combination).unwrap();
    match worker.execute(0, &combination, &dataset) {
        ExecutionOutcome::Completed {
            output,
            repetitions,
        } => {
            assert_eq!(repetitions, 3);
            assert!(fs::read_to_string(output).unwrap().contains("attempt=3"));
        }
        other => panic!("expected a completed execution, got {other:?}"),
    }
}

#[test]
pub fn started_worker_drains_the_sweep() {
    let fixture = single_dataset(1, |executor| executor);

    let handle = worker(&fixture).start().unwrap();
    assert_eq!(handle.host(), &Host::new("node-1.cluster"));

    let report = handle.join().unwrap();
    assert_eq!(report.done, 2);
    assert_eq!(fixture.sweeper().counts().done, 2);
}
