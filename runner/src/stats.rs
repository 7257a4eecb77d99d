use crate::{
    combination::{CombId, Combination, DatasetConfig, DatasetIndex},
    config::TestConfig,
};
use csv::{Reader, StringRecord, Writer, WriterBuilder};
use parking_lot::FairMutex;
use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Failed to access statistics: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write summary row: {0}")]
    Csv(#[from] csv::Error),
    #[error("Statistics were already initialized")]
    AlreadyInitialized,
    #[error("Statistics are not initialized or already closed")]
    NotInitialized,
    #[error("{path} has header {found} but this sweep writes {expected}")]
    HeaderMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

const DS_SUMMARY_HEADER: [&str; 3] = ["ds_id", "ds_class", "ds_class_properties"];

#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// directory receiving one captured output per combination id
    pub stats_path: PathBuf,
    pub summary_file: PathBuf,
    pub ds_summary_file: PathBuf,
}

impl From<&TestConfig> for StatsConfig {
    fn from(config: &TestConfig) -> Self {
        Self {
            stats_path: config.stats_path.clone(),
            summary_file: config.summary_file.clone(),
            ds_summary_file: config.ds_summary_file.clone(),
        }
    }
}

#[derive(Debug)]
/// Thread safe sink for the two summary tables of a sweep.
///
/// Both tables are append only and flushed after every row, all writes share a single lock.
pub struct StatsManager {
    config: StatsConfig,
    inner: FairMutex<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    summary: Option<Writer<File>>,
    ds_summary: Option<Writer<File>>,
    summary_props: Vec<String>,
    printed_dss: HashSet<DatasetIndex>,
    initialized: bool,
}

impl StatsManager {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            inner: FairMutex::new(StatsInner::default()),
        }
    }

    /// Create both summary files and write their headers, has to happen before any worker starts
    pub fn initialize(&self, ds_parameters: &[&str], xp_parameters: &[&str]) -> Result<(), StatsError> {
        let mut inner = self.inner.lock();

        if inner.initialized {
            return Err(StatsError::AlreadyInitialized);
        }

        fs::create_dir_all(&self.config.stats_path)?;
        let props = summary_props(ds_parameters, xp_parameters);

        let summary = create(&self.config.summary_file, &summary_header(&props))?;
        let ds_summary = create(&self.config.ds_summary_file, &DS_SUMMARY_HEADER)?;

        inner.summary_props = props;
        inner.summary = Some(summary);
        inner.ds_summary = Some(ds_summary);
        inner.initialized = true;

        info!(
            summary = %self.config.summary_file.to_string_lossy(),
            ds_summary = %self.config.ds_summary_file.to_string_lossy(),
            "Initialized summary files"
        );

        Ok(())
    }

    /// Continue the summaries of an earlier run of the same sweep.
    ///
    /// Existing summaries are appended to after their header was checked, missing ones are
    /// created like `initialize` does. Datasets that already have a row are not written again.
    /// Returns the first combination id not taken by an existing row or captured output.
    pub fn resume(&self, ds_parameters: &[&str], xp_parameters: &[&str]) -> Result<CombId, StatsError> {
        let mut inner = self.inner.lock();

        if inner.initialized {
            return Err(StatsError::AlreadyInitialized);
        }

        fs::create_dir_all(&self.config.stats_path)?;
        let props = summary_props(ds_parameters, xp_parameters);

        let (summary, rows) = reopen(&self.config.summary_file, &summary_header(&props))?;
        let (ds_summary, ds_rows) = reopen(&self.config.ds_summary_file, &DS_SUMMARY_HEADER)?;

        let mut next_comb_id = rows
            .iter()
            .filter_map(|row| row.get(0)?.parse::<CombId>().ok())
            .map(|comb_id| comb_id + 1)
            .max()
            .unwrap_or_default();
        for entry in fs::read_dir(&self.config.stats_path)? {
            let captured = entry?
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<CombId>().ok());

            if let Some(comb_id) = captured {
                next_comb_id = next_comb_id.max(comb_id + 1);
            }
        }

        inner
            .printed_dss
            .extend(ds_rows.iter().filter_map(|row| row.get(0)?.parse::<DatasetIndex>().ok()));
        inner.summary_props = props;
        inner.summary = Some(summary);
        inner.ds_summary = Some(ds_summary);
        inner.initialized = true;

        info!(
            rows = rows.len(),
            datasets = inner.printed_dss.len(),
            next_comb_id = next_comb_id,
            "Resumed summary files"
        );

        Ok(next_comb_id)
    }

    /// Record a dataset the first time any worker reports it, returns whether a row was written
    pub fn add_ds(&self, ds_id: DatasetIndex, dataset: &DatasetConfig) -> Result<bool, StatsError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        if inner.printed_dss.contains(&ds_id) {
            return Ok(false);
        }

        let writer = inner.ds_summary.as_mut().ok_or(StatsError::NotInitialized)?;
        writer.write_record([
            ds_id.to_string().as_str(),
            dataset.class.as_str(),
            dataset.properties().as_str(),
        ])?;
        writer.flush()?;
        inner.printed_dss.insert(ds_id);

        debug!(ds_id = ds_id, "Added dataset to statistics");

        Ok(true)
    }

    /// Copy the captured output next to the other statistics and append the combination row.
    ///
    /// Only the row itself is written under the lock, the copy happens before.
    pub fn add_combination(
        &self,
        comb_id: CombId,
        combination: &Combination,
        output: &Path,
    ) -> Result<PathBuf, StatsError> {
        let local_path = self.output_path(comb_id);

        info!(
            "Copying stats from comb with id {comb_id} to {}",
            local_path.to_string_lossy()
        );
        fs::copy(output, &local_path)?;

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let writer = inner.summary.as_mut().ok_or(StatsError::NotInitialized)?;

        let values = inner
            .summary_props
            .iter()
            .map(|name| combination.get(name).unwrap_or_default().into_owned());
        writer.write_record(std::iter::once(comb_id.to_string()).chain(values))?;
        writer.flush()?;

        Ok(local_path)
    }

    /// location of the captured output of a combination
    pub fn output_path(&self, comb_id: CombId) -> PathBuf {
        self.config.stats_path.join(comb_id.to_string())
    }

    /// Flush and close both summaries, closing again does nothing
    pub fn close(&self) -> Result<(), StatsError> {
        let mut inner = self.inner.lock();

        let mut closed = false;
        for writer in [inner.summary.take(), inner.ds_summary.take()]
            .into_iter()
            .flatten()
        {
            writer.into_inner().map_err(|error| error.into_error())?;
            closed = true;
        }

        if closed {
            info!("Closed summary files");
        }

        Ok(())
    }
}

fn summary_props(ds_parameters: &[&str], xp_parameters: &[&str]) -> Vec<String> {
    ds_parameters
        .iter()
        .chain(xp_parameters.iter())
        .map(|name| (*name).to_owned())
        .collect()
}

fn summary_header(summary_props: &[String]) -> Vec<&str> {
    std::iter::once("comb_id")
        .chain(summary_props.iter().map(String::as_str))
        .collect()
}

/// create or truncate `path` and write the header
fn create(path: &Path, header: &[&str]) -> Result<Writer<File>, StatsError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(header)?;
    writer.flush()?;

    Ok(writer)
}

/// Open `path` for appending after checking its header, returns the rows already in it
fn reopen(path: &Path, header: &[&str]) -> Result<(Writer<File>, Vec<StringRecord>), StatsError> {
    let existing = match fs::metadata(path) {
        Ok(metadata) => metadata.len() > 0,
        Err(error) if error.kind() == io::ErrorKind::NotFound => false,
        Err(error) => return Err(error.into()),
    };

    if !existing {
        return Ok((create(path, header)?, Vec::new()));
    }

    let mut reader = Reader::from_path(path)?;
    let found = reader.headers()?.clone();
    if found.iter().ne(header.iter().copied()) {
        return Err(StatsError::HeaderMismatch {
            path: path.to_string_lossy().into_owned(),
            expected: header.join(","),
            found: found.iter().collect::<Vec<_>>().join(","),
        });
    }
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;

    let file = OpenOptions::new().append(true).open(path)?;
    let writer = WriterBuilder::new().has_headers(false).from_writer(file);

    Ok((writer, rows))
}
