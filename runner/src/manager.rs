use crate::{
    combination::{CombId, Combination, DatasetConfig, DatasetIndex, ParameterView, DS_CONFIG},
    space::ParameterSpace,
    sweep::Sweeper,
};
use std::{
    borrow::Cow,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[derive(Debug)]
/// Hands out combination identifiers and projects combinations onto their parameter groups.
///
/// Only minting identifiers mutates state, every projection reads the immutable parameter
/// space and is safe to call from any worker.
pub struct CombinationManager {
    space: Arc<ParameterSpace>,
    sweeper: Sweeper,
    next_comb_id: AtomicU64,
    num_repetitions: NonZeroU32,
}

impl CombinationManager {
    pub fn new(space: Arc<ParameterSpace>, sweeper: Sweeper, num_repetitions: NonZeroU32) -> Self {
        Self {
            space,
            sweeper,
            next_comb_id: AtomicU64::new(0),
            num_repetitions,
        }
    }

    /// Continue minting identifiers at `first`, used when a sweep resumes an earlier run
    pub fn with_first_comb_id(self, first: CombId) -> Self {
        Self {
            next_comb_id: AtomicU64::new(first),
            ..self
        }
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Mint a fresh identifier, every call returns a new one even for the same combination
    pub fn get_comb_id(&self, _combination: &Combination) -> CombId {
        self.next_comb_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get_ds_id(&self, combination: &Combination) -> DatasetIndex {
        combination.ds_config()
    }

    pub fn get_ds_class_params(&self, combination: &Combination) -> Option<&DatasetConfig> {
        self.space.dataset(combination.ds_config())
    }

    /// dataset parameters of the combination with `ds.config` resolved to its configuration
    pub fn get_ds_parameters<'a>(&'a self, combination: &'a Combination) -> ParameterView<'a> {
        let mut view = ParameterView::default();

        for name in self.space.ds_parameters().keys() {
            if let Some(value) = combination.get(name) {
                view.insert(name, value);
            }
        }

        view.insert(
            DS_CONFIG,
            match self.get_ds_class_params(combination) {
                Some(config) => Cow::Owned(config.to_string()),
                None => Cow::Owned(combination.ds_config().to_string()),
            },
        );

        view
    }

    pub fn get_xp_parameters<'a>(&'a self, combination: &'a Combination) -> ParameterView<'a> {
        let mut view = ParameterView::default();

        for name in self.space.xp_parameters().keys() {
            if let Some(value) = combination.get(name) {
                view.insert(name, value);
            }
        }

        view
    }

    pub fn get_num_repetitions(&self) -> u32 {
        self.num_repetitions.get()
    }

    /// Both combinations agree on every dataset parameter, not only on `ds.config`
    pub fn uses_same_ds(&self, first: &Combination, second: &Combination) -> bool {
        first.ds_config() == second.ds_config()
            && self
                .space
                .ds_parameters()
                .keys()
                .all(|name| first.get(name) == second.get(name))
    }
}
