use crate::combination::Combination;
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum SweepState {
    Pending = 0,
    InProgress = 1,
    Done = 2,
    Cancelled = 3,
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Combination {0} is not part of the sweep")]
    UnknownCombination(Combination),
    #[error("Combination {combination} is {state:?} but was expected to be in progress")]
    NotInProgress {
        combination: Combination,
        state: SweepState,
    },
    #[error("Failed to access sweep state file: {0}")]
    StateFile(#[from] std::io::Error),
    #[error("Failed to (de)serialize sweep state: {0}")]
    StateFormat(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub cancelled: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    combination: Combination,
    state: SweepState,
}

#[derive(Debug, Clone)]
/// Transparent, thread safe handle to the state of every combination in the sweep
pub struct Sweeper(Arc<FairMutex<SweepTable>>);

#[derive(Debug)]
struct SweepTable {
    combinations: Vec<Combination>,
    states: Vec<SweepState>,
    index: HashMap<Combination, usize>,
    journal: Option<File>,
}

impl Sweeper {
    /// create a sweep with every given combination pending, duplicates are only kept once
    pub fn new(combinations: impl IntoIterator<Item = Combination>) -> Self {
        Self(Arc::new(FairMutex::new(SweepTable::new(combinations))))
    }

    /// Create a sweep that records every resolved combination in `path`.
    ///
    /// Combinations recorded as done by an earlier run are skipped, cancelled ones are pending
    /// again. The file is compacted to the restored state once, afterwards every resolution
    /// appends a single record.
    pub fn with_state_file(
        combinations: impl IntoIterator<Item = Combination>,
        path: PathBuf,
    ) -> Result<Self, SweepError> {
        let mut table = SweepTable::new(combinations);

        if path.exists() {
            table.restore(&path)?;
        }
        table.compact(&path)?;
        table.journal = Some(OpenOptions::new().append(true).open(&path)?);

        Ok(Self(Arc::new(FairMutex::new(table))))
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, SweepTable> {
        self.0.lock_arc()
    }

    /// Snapshot of every pending combination.
    ///
    /// Other workers might claim any of them right after, only use this for progress and
    /// termination checks.
    pub fn get_remaining(&self) -> Vec<Combination> {
        let table = self.lock();

        table
            .states
            .iter()
            .zip(table.combinations.iter())
            .filter(|(state, _)| **state == SweepState::Pending)
            .map(|(_, combination)| combination.clone())
            .collect()
    }

    /// number of pending combinations
    pub fn remaining(&self) -> usize {
        self.lock()
            .states
            .iter()
            .filter(|state| **state == SweepState::Pending)
            .count()
    }

    /// claim any pending combination
    pub fn get_next(&self) -> Option<Combination> {
        self.get_next_filtered(|_| true)
    }

    /// Claim the first pending combination accepted by `predicate`.
    ///
    /// Selection and the transition to in progress happen under the same lock, so a
    /// combination is never handed out twice.
    pub fn get_next_filtered<P>(&self, mut predicate: P) -> Option<Combination>
    where
        P: FnMut(&Combination) -> bool,
    {
        let mut table = self.lock();
        let table = &mut *table;

        let idx = table
            .states
            .iter()
            .zip(table.combinations.iter())
            .position(|(state, combination)| {
                *state == SweepState::Pending && predicate(combination)
            })?;
        table.states[idx] = SweepState::InProgress;

        Some(table.combinations[idx].clone())
    }

    pub fn done(&self, combination: &Combination) -> Result<(), SweepError> {
        self.lock().resolve(combination, SweepState::Done)
    }

    /// cancelled combinations are never handed out again during this sweep
    pub fn cancel(&self, combination: &Combination) -> Result<(), SweepError> {
        self.lock().resolve(combination, SweepState::Cancelled)
    }

    pub fn state(&self, combination: &Combination) -> Option<SweepState> {
        let table = self.lock();

        table.index.get(combination).map(|idx| table.states[*idx])
    }

    pub fn counts(&self) -> SweepCounts {
        self.lock()
            .states
            .iter()
            .fold(SweepCounts::default(), |mut counts, state| {
                match state {
                    SweepState::Pending => counts.pending += 1,
                    SweepState::InProgress => counts.in_progress += 1,
                    SweepState::Done => counts.done += 1,
                    SweepState::Cancelled => counts.cancelled += 1,
                }

                counts
            })
    }

    pub fn len(&self) -> usize {
        self.lock().combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SweepTable {
    fn new(combinations: impl IntoIterator<Item = Combination>) -> Self {
        let mut table = Self {
            combinations: Vec::new(),
            states: Vec::new(),
            index: HashMap::new(),
            journal: None,
        };

        for combination in combinations {
            if table.index.contains_key(&combination) {
                debug!(combination = %combination, "Skipped duplicated combination");
                continue;
            }

            table
                .index
                .insert(combination.clone(), table.combinations.len());
            table.combinations.push(combination);
            table.states.push(SweepState::Pending);
        }

        table
    }

    fn resolve(&mut self, combination: &Combination, state: SweepState) -> Result<(), SweepError> {
        let idx = *self
            .index
            .get(combination)
            .ok_or_else(|| SweepError::UnknownCombination(combination.clone()))?;

        match self.states[idx] {
            SweepState::InProgress => {
                self.states[idx] = state;
            }
            current => {
                return Err(SweepError::NotInProgress {
                    combination: combination.clone(),
                    state: current,
                })
            }
        }

        if let Some(journal) = self.journal.as_mut() {
            let record = StateRecord {
                combination: combination.clone(),
                state,
            };
            append_records(journal, std::slice::from_ref(&record))?;
        }

        Ok(())
    }

    fn restore(&mut self, path: &Path) -> Result<(), SweepError> {
        let content = fs::read_to_string(path)?;
        let records: Vec<StateRecord> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(&content)?
        };
        let mut skipped = 0;

        // later records win, a combination resolved in several runs keeps its last state
        for record in records {
            match self.index.get(&record.combination) {
                Some(idx) => {
                    self.states[*idx] = match record.state {
                        SweepState::Done => SweepState::Done,
                        _ => SweepState::Pending,
                    }
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                skipped = skipped,
                "Sweep state contains combinations that are not part of the current sweep"
            );
        }

        info!(
            done = self.states.iter().filter(|state| **state == SweepState::Done).count(),
            pending = self.states.iter().filter(|state| **state == SweepState::Pending).count(),
            "Restored sweep state from {}",
            path.to_string_lossy()
        );

        Ok(())
    }

    /// rewrite the state file atomically by renaming a fully written sibling file over it
    fn compact(&self, path: &Path) -> Result<(), SweepError> {
        let records = self
            .combinations
            .iter()
            .zip(self.states.iter())
            .filter(|(_, state)| matches!(state, SweepState::Done | SweepState::Cancelled))
            .map(|(combination, state)| StateRecord {
                combination: combination.clone(),
                state: *state,
            })
            .collect::<Vec<_>>();

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(directory)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            append_records(&mut writer, &records)?;
        }
        file.persist(path).map_err(|error| error.error)?;
        debug!(records = records.len(), "Compacted sweep state");

        Ok(())
    }
}

/// Append records as items of one block sequence, so the file stays a single YAML document.
///
/// Every record is written in one call and flushed right after.
fn append_records<W: Write>(writer: &mut W, records: &[StateRecord]) -> Result<(), SweepError> {
    for record in records {
        let item = serde_yaml::to_string(std::slice::from_ref(record))?;
        writer.write_all(item.as_bytes())?;
    }
    writer.flush()?;

    Ok(())
}
