// File: ./src/scheduler/learning.rs
//! Estimator profiles and observed completions, kept across restarts so a
//! completion is never learned from twice.
use crate::context::AppContext;
use crate::estimator::EstimateProfile;
use crate::storage::Storage;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// (calendar name, uid)
pub type CompletionKey = (String, String);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    pub profiles: BTreeMap<String, EstimateProfile>,
    pub observed: BTreeSet<CompletionKey>,
}

#[derive(Debug, Clone)]
pub struct LearningStore {
    path: PathBuf,
}

impl LearningStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn from_context(ctx: &dyn AppContext) -> Result<Self> {
        Ok(Self::new(ctx.get_learning_path()?))
    }

    pub fn load(&self) -> Result<LearningState> {
        Storage::load(&self.path)
    }

    pub fn save(&self, state: &LearningState) -> Result<()> {
        Storage::save(&self.path, state)
    }
}
