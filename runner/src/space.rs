use crate::{
    combination::{Combination, DatasetConfig, DS_CONFIG, RESERVED_PARAMETERS},
    config::{ConfigErrors, DatasetsConfig, ExperimentConfig, ParameterValues},
};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, error};

pub type ParameterMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
/// Cartesian space of dataset and experiment parameters.
///
/// The dataset group implicitly contains `ds.config`, ranging over the dataset configuration
/// table, the experiment group is used as given.
pub struct ParameterSpace {
    datasets: Vec<DatasetConfig>,
    ds_parameters: ParameterMap,
    xp_parameters: ParameterMap,
}

impl ParameterSpace {
    pub fn new(
        datasets: Vec<DatasetConfig>,
        ds_parameters: ParameterMap,
        xp_parameters: ParameterMap,
    ) -> Result<Self, ConfigErrors> {
        if let Some(name) = RESERVED_PARAMETERS
            .into_iter()
            .find(|name| ds_parameters.contains_key(*name) || xp_parameters.contains_key(*name))
        {
            return Err(ConfigErrors::ReservedParameter(name.to_owned()));
        }

        if let Some(name) = ds_parameters
            .keys()
            .find(|name| xp_parameters.contains_key(*name))
        {
            return Err(ConfigErrors::DuplicateParameter(name.clone()));
        }

        Ok(Self {
            datasets,
            ds_parameters,
            xp_parameters,
        })
    }

    /// Build the space from the `datasets` and `experiment` config sections.
    ///
    /// Class parameters either hold one value shared by every class or exactly one value per
    /// class, an empty value leaves the parameter unset for that class.
    pub fn from_config(
        datasets: &DatasetsConfig,
        experiment: &ExperimentConfig,
    ) -> Result<Self, ConfigErrors> {
        let class_count = datasets.classes.len();
        let mut configs = Vec::with_capacity(class_count);

        for (idx, class) in datasets.classes.iter().enumerate() {
            let mut params = BTreeMap::new();

            for (name, values) in datasets.class_parameters.iter() {
                let value = match values.0.len() {
                    len if len == class_count => &values.0[idx],
                    1 => &values.0[0],
                    found => {
                        error!("Number of dataset classes does not match number of {name}");

                        return Err(ConfigErrors::ClassParameterCardinality {
                            name: name.clone(),
                            expected: class_count,
                            found,
                        });
                    }
                };

                if !value.is_empty() {
                    params.insert(name.clone(), value.clone());
                }
            }

            debug!(idx = idx, class = %class, "Created dataset configuration");
            configs.push(DatasetConfig::new(class.trim(), params));
        }

        Self::new(
            configs,
            to_parameter_map(&datasets.parameters),
            to_parameter_map(&experiment.parameters),
        )
    }

    pub fn datasets(&self) -> &[DatasetConfig] {
        &self.datasets
    }

    pub fn dataset(&self, idx: usize) -> Option<&DatasetConfig> {
        self.datasets.get(idx)
    }

    /// names of the dataset group, `ds.config` included as the last entry
    pub fn ds_parameter_names(&self) -> Vec<&str> {
        self.ds_parameters
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(DS_CONFIG))
            .collect()
    }

    pub fn xp_parameter_names(&self) -> Vec<&str> {
        self.xp_parameters.keys().map(String::as_str).collect()
    }

    pub fn ds_parameters(&self) -> &ParameterMap {
        &self.ds_parameters
    }

    pub fn xp_parameters(&self) -> &ParameterMap {
        &self.xp_parameters
    }

    /// number of combinations without materializing them
    pub fn len(&self) -> usize {
        self.ds_parameters
            .values()
            .chain(self.xp_parameters.values())
            .map(Vec::len)
            .product::<usize>()
            * self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full cross product of all parameters
    pub fn combinations(&self) -> Vec<Combination> {
        if self.is_empty() {
            return Vec::new();
        }

        let axes = self
            .ds_parameters
            .iter()
            .chain(self.xp_parameters.iter())
            .collect_vec();

        // the dataset configuration is always the first axis, so the product never runs over an
        // empty list of axes
        std::iter::once(0..self.datasets.len())
            .chain(axes.iter().map(|(_, values)| 0..values.len()))
            .multi_cartesian_product()
            .filter_map(|picks| {
                let (ds_config, picks) = picks.split_first()?;

                Some(Combination::new(
                    *ds_config,
                    axes.iter()
                        .zip(picks)
                        .map(|((name, values), pick)| ((*name).clone(), values[*pick].clone()))
                        .collect(),
                ))
            })
            .collect()
    }
}

fn to_parameter_map(parameters: &BTreeMap<String, ParameterValues>) -> ParameterMap {
    parameters
        .iter()
        .map(|(name, values)| (name.clone(), values.0.clone()))
        .collect()
}
