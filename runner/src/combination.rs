use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap, fmt};

/// Name of the implicit dataset parameter indexing the dataset configuration table
pub const DS_CONFIG: &str = "ds.config";

/// Class parameter holding the local file a dataset is read from
pub const LOCAL_PATH: &str = "local_path";

/// payload key naming the class of the prepared dataset
pub const DS_CLASS_KEY: &str = "ds.class";
/// payload key naming the remote location of the prepared dataset
pub const DS_PATH_KEY: &str = "ds.class.path";

/// Names no dataset or experiment parameter may use, the runner fills them in itself
pub const RESERVED_PARAMETERS: [&str; 3] = [DS_CONFIG, DS_CLASS_KEY, DS_PATH_KEY];

/// Position of a dataset configuration in the table built with the parameter space
pub type DatasetIndex = usize;

/// Identifier minted for a combination the moment a worker claims it
pub type CombId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A dataset class together with its class specific parameters
pub struct DatasetConfig {
    pub class: String,
    pub params: BTreeMap<String, String>,
}

impl DatasetConfig {
    pub fn new(class: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            class: class.into(),
            params,
        }
    }

    pub fn local_path(&self) -> Option<&str> {
        self.params.get(LOCAL_PATH).map(String::as_str)
    }

    /// render the class parameters the way they end up in the dataset summary
    pub fn properties(&self) -> String {
        format!(
            "{{{}}}",
            self.params
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .join(", ")
        )
    }
}

impl fmt::Display for DatasetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class, self.properties())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// One value for every dataset and experiment parameter of the sweep.
///
/// Combinations are immutable once built, the `ds.config` entry is kept as a typed index
/// next to the plain string values.
pub struct Combination {
    ds_config: DatasetIndex,
    values: BTreeMap<String, String>,
}

impl Combination {
    pub fn new(ds_config: DatasetIndex, values: BTreeMap<String, String>) -> Self {
        Self { ds_config, values }
    }

    pub fn ds_config(&self) -> DatasetIndex {
        self.ds_config
    }

    /// look up a parameter value, `ds.config` resolves to the rendered index
    pub fn get(&self, name: &str) -> Option<Cow<'_, str>> {
        if name == DS_CONFIG {
            Some(Cow::Owned(self.ds_config.to_string()))
        } else {
            self.values.get(name).map(|value| Cow::Borrowed(value.as_str()))
        }
    }

    /// all parameters except `ds.config`
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}{}{DS_CONFIG}={}}}",
            self.values
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .join(", "),
            if self.values.is_empty() { "" } else { ", " },
            self.ds_config
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Read only projection of a combination onto one parameter group
pub struct ParameterView<'a>(BTreeMap<&'a str, Cow<'a, str>>);

impl<'a> ParameterView<'a> {
    pub(crate) fn insert(&mut self, name: &'a str, value: Cow<'a, str>) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(AsRef::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParameterView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.0
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .join(", ")
        )
    }
}
