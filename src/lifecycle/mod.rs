//! Component lifecycle
//!
//! Engine components are registered with a [`LifecycleOrchestrator`] in
//! dependency order. Initialization and reload walk that order, shutdown walks
//! it in reverse. A failing component is logged and reported but never stops
//! the remaining components from running.

use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::error::{NexusError, Result};

pub trait Lifecycle: Send + Sync {
    /// Stable name used in logs and failure reports
    fn name(&self) -> &'static str;

    fn init(&self, config: &EngineConfig) -> Result<()>;

    /// Re-read configuration. Defaults to running `init` again.
    fn reload(&self, config: &EngineConfig) -> Result<()> {
        self.init(config)
    }

    fn shutdown(&self) -> Result<()>;
}

/// Phase a component failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Reload,
    Shutdown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Reload => "reload",
            Phase::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
pub struct ComponentFailure {
    pub component: &'static str,
    pub phase: Phase,
    pub error: NexusError,
}

/// Failures collected over one pass through the components
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub failures: Vec<ComponentFailure>,
}

impl LifecycleReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the first failure, if any
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().next() {
            None => Ok(()),
            Some(failure) => Err(NexusError::Lifecycle {
                component: failure.component,
                message: format!("{} failed: {}", failure.phase, failure.error),
            }),
        }
    }
}

#[derive(Default)]
pub struct LifecycleOrchestrator {
    components: Vec<Arc<dyn Lifecycle>>,
}

impl LifecycleOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: Arc<dyn Lifecycle>) {
        self.components.push(component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn init_all(&self, config: &EngineConfig) -> LifecycleReport {
        self.run(Phase::Init, self.components.iter(), |c| c.init(config))
    }

    pub fn reload_all(&self, config: &EngineConfig) -> LifecycleReport {
        self.run(Phase::Reload, self.components.iter(), |c| c.reload(config))
    }

    pub fn shutdown_all(&self) -> LifecycleReport {
        self.run(Phase::Shutdown, self.components.iter().rev(), |c| c.shutdown())
    }

    fn run<'a, I, F>(&self, phase: Phase, components: I, mut step: F) -> LifecycleReport
    where
        I: Iterator<Item = &'a Arc<dyn Lifecycle>>,
        F: FnMut(&dyn Lifecycle) -> Result<()>,
    {
        let mut report = LifecycleReport::default();
        for component in components {
            match step(component.as_ref()) {
                Ok(()) => tracing::debug!("{} {} complete", component.name(), phase),
                Err(error) => {
                    tracing::error!("{} {} failed: {}", component.name(), phase, error);
                    report.failures.push(ComponentFailure {
                        component: component.name(),
                        phase,
                        error,
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    impl Lifecycle for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&self, _config: &EngineConfig) -> Result<()> {
            self.log.lock().push(format!("init {}", self.name));
            if self.fail_init {
                return Err(NexusError::Config("boom".into()));
            }
            Ok(())
        }

        fn shutdown(&self) -> Result<()> {
            self.log.lock().push(format!("shutdown {}", self.name));
            Ok(())
        }
    }

    fn orchestrator(fail: &[bool]) -> (LifecycleOrchestrator, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let names = ["a", "b", "c"];
        let mut orch = LifecycleOrchestrator::new();
        for (name, fail_init) in names.iter().zip(fail) {
            orch.register(Arc::new(Recorder {
                name: *name,
                log: log.clone(),
                fail_init: *fail_init,
            }));
        }
        (orch, log)
    }

    #[test]
    fn test_init_in_order_shutdown_in_reverse() {
        let (orch, log) = orchestrator(&[false, false, false]);
        let config = EngineConfig::default();

        assert!(orch.init_all(&config).is_ok());
        assert!(orch.shutdown_all().is_ok());

        assert_eq!(
            *log.lock(),
            vec!["init a", "init b", "init c", "shutdown c", "shutdown b", "shutdown a"]
        );
    }

    #[test]
    fn test_failure_does_not_stop_later_components() {
        let (orch, log) = orchestrator(&[false, true, false]);
        let report = orch.init_all(&EngineConfig::default());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, "b");
        assert_eq!(report.failures[0].phase, Phase::Init);
        assert!(log.lock().contains(&"init c".to_string()));
        assert!(matches!(
            report.into_result(),
            Err(NexusError::Lifecycle { component: "b", .. })
        ));
    }

    #[test]
    fn test_reload_defaults_to_init() {
        let (orch, log) = orchestrator(&[false, false, false]);
        assert!(orch.reload_all(&EngineConfig::default()).is_ok());
        assert_eq!(log.lock().len(), 3);
        assert_eq!(orch.names(), vec!["a", "b", "c"]);
    }
}
