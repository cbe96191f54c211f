//! Runs a subsystem's Definition, Tools and Calculate phases.
//!
//! Every phase evaluates its formulas in authoring order against one shared
//! [`EvalContext`]. A formula that fails to compile or evaluate is logged and
//! treated as a default: Definition and Tools bind `0.0`, a Calculate output
//! is skipped. Calculate outputs whose Definition reads a primary-entity
//! attribute are written back to that attribute.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::spec::PipelineSpec;
use crate::core::types::{Role, MODE_ADVERSARIAL, MODE_SOLO};
use crate::formula::{
    parse_dynamic_ref, EvalContext, Expr, FormulaCache, RandomSource, Section, ThreadRandom,
};
use crate::profile::EntityProfile;

/// Name of the Calculate output returned as the pipeline's result
pub const FINAL_OUTPUT: &str = "final";

/// Inputs of one pipeline run
pub struct Invocation<'a> {
    pub primary: &'a EntityProfile,
    pub secondary: Option<&'a EntityProfile>,
    pub mode: Option<String>,
    pub bindings: Vec<(String, f64)>,
}

impl<'a> Invocation<'a> {
    pub fn solo(primary: &'a EntityProfile) -> Self {
        Self {
            primary,
            secondary: None,
            mode: None,
            bindings: Vec::new(),
        }
    }

    pub fn versus(primary: &'a EntityProfile, secondary: &'a EntityProfile) -> Self {
        Self {
            secondary: Some(secondary),
            ..Self::solo(primary)
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: f64) -> Self {
        self.bindings.push((name.into(), value));
        self
    }

    /// Explicit mode, else inferred from whether a secondary entity is bound
    pub fn resolved_mode(&self) -> &str {
        match (&self.mode, self.secondary) {
            (Some(mode), _) => mode.as_str(),
            (None, Some(_)) => MODE_ADVERSARIAL,
            (None, None) => MODE_SOLO,
        }
    }
}

/// An attribute write-back from a Calculate output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeWrite {
    pub attribute: String,
    pub value: f64,
    /// False when the profile rejected the key
    pub applied: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutcome {
    /// Calculate table used (empty for a flat Calculate section)
    pub mode: String,
    /// Successful Calculate outputs in evaluation order
    pub outputs: IndexMap<String, f64>,
    pub writes: Vec<AttributeWrite>,
    pub final_value: f64,
}

impl PipelineOutcome {
    pub fn output(&self, name: &str) -> Option<f64> {
        self.outputs.get(name).copied()
    }
}

/// Shared, stateless pipeline runner
pub struct Pipeline {
    cache: Arc<FormulaCache>,
    random: Arc<dyn RandomSource>,
}

impl Pipeline {
    pub fn new(cache: Arc<FormulaCache>) -> Self {
        Self::with_random(cache, Arc::new(ThreadRandom))
    }

    pub fn with_random(cache: Arc<FormulaCache>, random: Arc<dyn RandomSource>) -> Self {
        Self { cache, random }
    }

    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    pub fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    pub fn run(
        &self,
        namespace: &str,
        spec: &PipelineSpec,
        invocation: &Invocation<'_>,
    ) -> PipelineOutcome {
        let mut ctx = EvalContext::new(Some(invocation.primary), invocation.secondary)
            .with_random(self.random.as_ref());
        for (name, value) in &invocation.bindings {
            ctx.bind(name.clone(), *value);
        }

        for (name, text) in &spec.definition {
            let value = self.eval_or_zero(namespace, Section::Definition, name, name, text, &ctx);
            ctx.bind(name.clone(), value);
        }

        for (name, text) in &spec.tools {
            let value = self.eval_or_zero(namespace, Section::Tools, name, name, text, &ctx);
            ctx.bind(name.clone(), value);
        }

        let requested = invocation.resolved_mode();
        let mut outcome = PipelineOutcome::default();
        let Some((mode, outputs)) = spec.calculate.select(requested) else {
            tracing::warn!("{}: no Calculate table for mode '{}'", namespace, requested);
            return outcome;
        };
        outcome.mode = mode.to_string();

        for (name, text) in outputs {
            let key = if mode.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", mode, name)
            };
            let value = self.eval(namespace, Section::Calculate, &key, name, text, &ctx);
            let Some(value) = value else {
                continue;
            };
            ctx.bind(name.clone(), value);
            outcome.outputs.insert(name.clone(), value);

            if let Some(attribute) = spec.definition.get(name).and_then(|d| write_back_target(d)) {
                let applied = invocation.primary.set_stat(attribute, value);
                outcome.writes.push(AttributeWrite {
                    attribute: attribute.to_string(),
                    value,
                    applied,
                });
            }
        }

        outcome.final_value = outcome
            .outputs
            .get(FINAL_OUTPUT)
            .or_else(|| outcome.outputs.values().last())
            .copied()
            .unwrap_or(0.0);
        outcome
    }

    fn eval_or_zero(
        &self,
        namespace: &str,
        section: Section,
        key: &str,
        name: &str,
        text: &str,
        ctx: &EvalContext<'_>,
    ) -> f64 {
        self.eval(namespace, section, key, name, text, ctx).unwrap_or(0.0)
    }

    fn eval(
        &self,
        namespace: &str,
        section: Section,
        key: &str,
        name: &str,
        text: &str,
        ctx: &EvalContext<'_>,
    ) -> Option<f64> {
        let expr: Arc<Expr> = match self.cache.get_or_compile(namespace, section, key, text) {
            Ok(expr) => expr,
            Err(e) => {
                tracing::warn!("{} {} '{}': {} in \"{}\"", namespace, section, name, e, text);
                return None;
            }
        };
        match expr.evaluate(ctx) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("{} {} '{}': {}", namespace, section, name, e);
                None
            }
        }
    }
}

/// The primary-entity attribute a Definition reads, if the Definition is
/// exactly one dynamic reference like `%entity-status#Health%`
pub fn write_back_target(definition: &str) -> Option<&str> {
    let inner = definition.trim().strip_prefix('%')?.strip_suffix('%')?;
    if inner.contains('%') {
        return None;
    }
    let reference = parse_dynamic_ref(inner)?;
    (reference.role == Role::Primary).then_some(reference.attribute)
}
