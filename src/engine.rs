//! Engine façade wiring configuration, registry, formula cache, pipelines,
//! class tree and profiles together.

use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::attributes::AttributeRegistry;
use crate::classes::ClassTree;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::formula::{EvalContext, FormulaCache, RandomSource, Section, ThreadRandom};
use crate::lifecycle::LifecycleOrchestrator;
use crate::pipeline::{self, BattleRequest, Pipeline, PipelineOutcome, StatusSystems};
use crate::profile::{EntityProfile, ProfileManager, ProfileStorage};

/// Cache namespace for formulas passed to [`NexusEngine::calculate`]
pub const ADHOC_NAMESPACE: &str = "adhoc";

pub struct NexusEngine {
    config: ArcSwap<EngineConfig>,
    registry: Arc<AttributeRegistry>,
    cache: Arc<FormulaCache>,
    pipeline: Pipeline,
    classes: ArcSwap<ClassTree>,
    profiles: Arc<ProfileManager>,
    lifecycle: LifecycleOrchestrator,
    /// Pipeline runs hold this shared; reload holds it exclusively so no run
    /// can cache formulas from the old config after the cache is cleared.
    epoch: RwLock<()>,
}

impl NexusEngine {
    pub fn new(config: EngineConfig, storage: Arc<dyn ProfileStorage>) -> Result<Self> {
        Self::with_random(config, storage, Arc::new(ThreadRandom))
    }

    pub fn with_random(
        config: EngineConfig,
        storage: Arc<dyn ProfileStorage>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let registry = Arc::new(AttributeRegistry::new());
        let cache = Arc::new(FormulaCache::new());
        let profiles = Arc::new(ProfileManager::new(storage, registry.clone())?);

        let mut lifecycle = LifecycleOrchestrator::new();
        lifecycle.register(registry.clone());
        lifecycle.register(cache.clone());
        lifecycle.register(profiles.clone());

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            registry,
            pipeline: Pipeline::with_random(cache.clone(), random),
            cache,
            classes: ArcSwap::from_pointee(ClassTree::default()),
            profiles,
            lifecycle,
            epoch: RwLock::new(()),
        })
    }

    /// Initialize every component. Component failures are logged; the first
    /// one is returned after all components have had their turn.
    pub fn enable(&self) -> Result<()> {
        let config = self.config.load_full();
        report_problems(&config);
        let report = self.lifecycle.init_all(&config);
        self.classes.store(Arc::new(ClassTree::build(&config.classes)));
        tracing::info!(
            "Engine enabled: {} attributes, {} systems",
            self.registry.len(),
            config.systems.len()
        );
        report.into_result()
    }

    /// Swap in new configuration. The registry is rebuilt, compiled formulas
    /// are dropped and loaded profiles pick up new defaults.
    pub fn reload(&self, config: EngineConfig) -> Result<()> {
        report_problems(&config);
        let config = Arc::new(config);
        let _epoch = self.epoch.write();
        self.config.store(config.clone());
        let report = self.lifecycle.reload_all(&config);
        self.classes.store(Arc::new(ClassTree::build(&config.classes)));
        tracing::info!("Engine reloaded");
        report.into_result()
    }

    /// Shut components down in reverse order. Blocks until every profile
    /// has been saved.
    pub fn shutdown(&self) -> Result<()> {
        let report = self.lifecycle.shutdown_all();
        tracing::info!("Engine shut down");
        report.into_result()
    }

    /// Evaluate a one-off formula. Failures read as `0.0` with a warning.
    pub fn calculate(
        &self,
        text: &str,
        primary: Option<&EntityProfile>,
        secondary: Option<&EntityProfile>,
    ) -> f64 {
        let expr = match self.cache.get_or_compile(ADHOC_NAMESPACE, Section::Adhoc, text, text) {
            Ok(expr) => expr,
            Err(e) => {
                tracing::warn!("Failed to compile \"{}\": {}", text, e);
                return 0.0;
            }
        };
        let ctx = EvalContext::new(primary, secondary).with_random(self.pipeline.random());
        expr.evaluate(&ctx).unwrap_or_else(|e| {
            tracing::warn!("Failed to evaluate \"{}\": {}", text, e);
            0.0
        })
    }

    /// Run the battle pipeline. Without a `[battle]` section the outcome is
    /// empty and `final_value` is `0.0`.
    pub fn compute_damage(
        &self,
        attacker: &EntityProfile,
        defender: Option<&EntityProfile>,
        request: &BattleRequest,
    ) -> PipelineOutcome {
        let _epoch = self.epoch.read();
        let config = self.config.load();
        match &config.battle {
            Some(battle) => {
                pipeline::compute_damage(&self.pipeline, battle, attacker, defender, request)
            }
            None => {
                tracing::warn!("compute_damage called without a [battle] configuration");
                PipelineOutcome::default()
            }
        }
    }

    /// Run every status system for one profile
    pub fn update_profile_stats(
        &self,
        profile: &EntityProfile,
    ) -> IndexMap<String, PipelineOutcome> {
        let _epoch = self.epoch.read();
        let config = self.config.load();
        StatusSystems::new(&self.pipeline, &config.systems).update_profile(profile)
    }

    /// Run every status system for every loaded profile in parallel
    pub fn update_all_profiles(&self) -> usize {
        let _epoch = self.epoch.read();
        let config = self.config.load();
        let profiles = self.profiles.profiles();
        StatusSystems::new(&self.pipeline, &config.systems).update_all(&profiles)
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load_full()
    }

    pub fn registry(&self) -> &Arc<AttributeRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    pub fn profiles(&self) -> &Arc<ProfileManager> {
        &self.profiles
    }

    pub fn classes(&self) -> Arc<ClassTree> {
        self.classes.load_full()
    }
}

fn report_problems(config: &EngineConfig) {
    if let Err(problems) = config.validate() {
        for problem in &problems {
            tracing::warn!("Config problem: {}", problem);
        }
    }
}
