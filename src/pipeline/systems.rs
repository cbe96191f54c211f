//! Normal status systems (Health, Mana, Exp, ...) recomputed per profile

use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;

use super::orchestrator::{Invocation, Pipeline, PipelineOutcome};
use super::spec::PipelineSpec;
use crate::profile::EntityProfile;

pub struct StatusSystems<'a> {
    pipeline: &'a Pipeline,
    systems: &'a IndexMap<String, PipelineSpec>,
}

impl<'a> StatusSystems<'a> {
    pub fn new(pipeline: &'a Pipeline, systems: &'a IndexMap<String, PipelineSpec>) -> Self {
        Self { pipeline, systems }
    }

    /// Run every system in configuration order for one profile, in solo mode
    pub fn update_profile(&self, profile: &EntityProfile) -> IndexMap<String, PipelineOutcome> {
        self.systems
            .iter()
            .map(|(name, spec)| {
                let outcome = self.pipeline.run(name, spec, &Invocation::solo(profile));
                (name.clone(), outcome)
            })
            .collect()
    }

    /// Update many profiles in parallel. Returns the number of attribute
    /// writes applied across all of them.
    pub fn update_all(&self, profiles: &[Arc<EntityProfile>]) -> usize {
        let writes: usize = profiles
            .par_iter()
            .map(|profile| {
                self.update_profile(profile)
                    .values()
                    .map(|o| o.writes.iter().filter(|w| w.applied).count())
                    .sum::<usize>()
            })
            .sum();
        tracing::debug!("Updated {} profiles, {} attribute writes", profiles.len(), writes);
        writes
    }
}
