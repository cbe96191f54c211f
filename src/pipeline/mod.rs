//! Formula pipelines
//!
//! A subsystem (a status system such as `Health`, or the battle system) is a
//! [`PipelineSpec`] of three ordered phases. [`Pipeline::run`] evaluates them
//! for one invocation and writes results back to the primary entity.

pub mod battle;
pub mod orchestrator;
pub mod spec;
pub mod systems;

pub use battle::{
    compute_damage, resolve_context_multiplier, BattleConfig, BattleRequest, CategoryEntry,
    DamageCategories, DamageTag,
};
pub use orchestrator::{
    write_back_target, AttributeWrite, Invocation, Pipeline, PipelineOutcome, FINAL_OUTPUT,
};
pub use spec::{CalculateSection, FormulaMap, PipelineSpec};
pub use systems::StatusSystems;
