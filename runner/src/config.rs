use crate::combination::{DS_CONFIG, LOCAL_PATH, RESERVED_PARAMETERS};
use itertools::Itertools;
use serde::{
    de::{self, SeqAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufReader, Error},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[from] Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] serde_yaml::Error),
    #[error("Number of dataset classes ({expected}) does not match number of values for {name} ({found})")]
    ClassParameterCardinality {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Parameter {0} is defined for both datasets and experiments")]
    DuplicateParameter(String),
    #[error("Parameter name {0} is reserved")]
    ReservedParameter(String),
    #[error("Preflight checks failed with {0} error(s)")]
    Preflight(usize),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // settings of the sweep itself, output locations and repetitions
    #[serde(default)]
    pub test: TestConfig,
    // dataset classes, their class parameters and dataset affecting parameters
    #[serde(alias = "ds")]
    pub datasets: DatasetsConfig,
    // parameters that only affect the experiment
    #[serde(default, alias = "xp")]
    pub experiment: ExperimentConfig,
    // already acquired hosts, reservation happens outside of the runner
    #[serde(default)]
    pub hosts: Vec<String>,
    pub executor: ExecutorConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,
    #[serde(default = "default_summary_file")]
    pub summary_file: PathBuf,
    #[serde(default = "default_ds_summary_file")]
    pub ds_summary_file: PathBuf,
    #[serde(default = "default_num_repetitions")]
    pub num_repetitions: u32,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: PathBuf,
    pub state_file: Option<PathBuf>,
    // files pushed once to every host before any combination runs
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            stats_path: default_stats_path(),
            summary_file: default_summary_file(),
            ds_summary_file: default_ds_summary_file(),
            num_repetitions: default_num_repetitions(),
            remote_dir: default_remote_dir(),
            state_file: None,
            artifacts: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DatasetsConfig {
    #[serde(default)]
    pub classes: Vec<String>,
    // either a single value shared by all classes or one value per class
    #[serde(default)]
    pub class_parameters: BTreeMap<String, ParameterValues>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValues>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValues>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Ssh {
        user: Option<String>,
        #[serde(default)]
        ssh_options: Vec<String>,
        command: CommandConfig,
    },
    Local {
        root: PathBuf,
        command: CommandConfig,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
/// Experiment binary, the path of the pushed configuration is appended as last argument
pub struct CommandConfig {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
/// List of values for a single parameter.
///
/// Accepts a YAML sequence of scalars or a single scalar. A single string is split on `,`
/// so `"1, 2, 4"` and `[1, 2, 4]` describe the same three values. Values are handed to the
/// experiment verbatim, floats have to be quoted since YAML does not keep their literal.
pub struct ParameterValues(pub Vec<String>);

struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string, integer or boolean")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Err(E::custom(format!(
            "float value {value} has to be quoted to keep its exact text"
        )))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(value.to_owned())
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(value)
    }
}

struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScalarVisitor).map(Scalar)
    }
}

struct ValuesVisitor;

impl<'de> Visitor<'de> for ValuesVisitor {
    type Value = ParameterValues;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a scalar or a sequence of scalars")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        ScalarVisitor.visit_bool(value).map(|value| ParameterValues(vec![value]))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_i64(value).map(|value| ParameterValues(vec![value]))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_u64(value).map(|value| ParameterValues(vec![value]))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        ScalarVisitor.visit_f64(value).map(|value| ParameterValues(vec![value]))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(value.split(',').map(|value| value.trim().to_owned()).collect())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
        while let Some(Scalar(value)) = seq.next_element()? {
            values.push(value);
        }

        Ok(ParameterValues(values))
    }
}

impl<'de> Deserialize<'de> for ParameterValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValuesVisitor)
    }
}

impl<S: Into<String>> FromIterator<S> for ParameterValues {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let reader = BufReader::new(File::open(path)?);

        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Validate the parts of the config that can't be expressed in the types.
    ///
    /// Every problem is logged before failing so users can fix them in one go.
    pub fn preflight_checks(&self) -> Result<(), ConfigErrors> {
        let mut errors = 0;

        if self.hosts.is_empty() {
            error!("No hosts were given, unable to run any combination");
            errors += 1;
        }

        if self.test.num_repetitions == 0 {
            error!("test.num_repetitions must be at least 1");
            errors += 1;
        }

        for name in self
            .datasets
            .parameters
            .keys()
            .chain(self.experiment.parameters.keys())
        {
            if RESERVED_PARAMETERS.contains(&name.as_str()) {
                error!("Parameter name {name} is reserved for the prepared dataset");
                errors += 1;
            }
        }

        if self.datasets.class_parameters.contains_key(DS_CONFIG) {
            error!("Parameter name {DS_CONFIG} is reserved for the dataset configuration index");
            errors += 1;
        }

        for name in self.datasets.parameters.keys() {
            if self.experiment.parameters.contains_key(name) {
                error!("Parameter {name} is defined for both datasets and experiments");
                errors += 1;
            }
        }

        if self.datasets.classes.is_empty() {
            warn!("datasets.classes is empty, the sweep will not contain any combination");
        } else {
            match self.datasets.class_parameters.get(LOCAL_PATH) {
                Some(values) => {
                    if values.0.iter().any(String::is_empty) {
                        error!("datasets.class_parameters.{LOCAL_PATH} must be set for every class");
                        errors += 1;
                    }
                }
                None => {
                    error!("datasets.class_parameters.{LOCAL_PATH} is required to transfer datasets");
                    errors += 1;
                }
            }
        }

        let empty = self
            .datasets
            .parameters
            .iter()
            .chain(self.experiment.parameters.iter())
            .filter(|(_, values)| values.0.is_empty())
            .map(|(name, _)| name)
            .collect_vec();
        if !empty.is_empty() {
            warn!(parameters = ?empty, "Parameters without values, the sweep will be empty");
        }

        for artifact in self.test.artifacts.iter() {
            if !artifact.is_file() {
                error!(
                    "Artifact {} is either not a file or not found",
                    artifact.to_string_lossy()
                );
                errors += 1;
            }
        }

        if errors == 0 {
            Ok(())
        } else {
            Err(ConfigErrors::Preflight(errors))
        }
    }
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("stats")
}

fn default_summary_file() -> PathBuf {
    PathBuf::from("summary.csv")
}

fn default_ds_summary_file() -> PathBuf {
    PathBuf::from("ds-summary.csv")
}

fn default_num_repetitions() -> u32 {
    1
}

fn default_remote_dir() -> PathBuf {
    PathBuf::from("/tmp")
}
