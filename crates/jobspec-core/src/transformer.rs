use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use crate::Map;
use crate::error::JobspecError;
use crate::spec::JobSpec;
use crate::step::{StepResult, StepTable};
use crate::workload::{Workload, decompose};

/// Options shared by all transformers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformerConfig {
    /// Record backend commands instead of executing them
    pub dry_run: bool,
    /// Block until submitted work finishes
    pub wait: bool,
}

/// A backend that turns jobspecs into steps it knows how to execute.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Step variants this transformer provides.
    fn steps(&self) -> &StepTable;

    fn parse(&self, jobspec: Arc<JobSpec>) -> crate::Result<Workload> {
        decompose(jobspec, self.steps())
    }

    /// Decomposes the jobspec and runs the resulting workload in `stage`.
    fn run(&self, jobspec: Arc<JobSpec>, stage: &Path) -> crate::Result<Vec<StepResult>> {
        let workload = self.parse(jobspec)?;
        log::debug!(
            "Transformer {} is running {} step(s) in {}",
            self.name(),
            workload.len(),
            stage.display()
        );
        workload.run(stage)
    }
}

pub type TransformerFactory = fn(&TransformerConfig) -> crate::Result<Box<dyn Transformer>>;

struct TransformerEntry {
    description: String,
    factory: TransformerFactory,
}

/// Maps transformer names to their factories.
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: Map<String, TransformerEntry>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transformer(
        &mut self,
        name: &str,
        description: &str,
        factory: TransformerFactory,
    ) -> crate::Result<()> {
        if self.transformers.contains_key(name) {
            return Err(JobspecError::DuplicatePluginError(name.to_string()));
        }
        log::debug!("Registering transformer {name}");
        self.transformers.insert(
            name.to_string(),
            TransformerEntry {
                description: description.to_string(),
                factory,
            },
        );
        Ok(())
    }

    pub fn get_transformer(&self, name: &str) -> crate::Result<TransformerFactory> {
        self.transformers
            .get(name)
            .map(|entry| entry.factory)
            .ok_or_else(|| JobspecError::PluginNotFoundError(name.to_string()))
    }

    /// Looks up a transformer and instantiates it with `config`.
    pub fn create(
        &self,
        name: &str,
        config: &TransformerConfig,
    ) -> crate::Result<Box<dyn Transformer>> {
        let factory = self.get_transformer(name)?;
        factory(config)
    }

    /// Registered transformers as (name, description), sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut items: Vec<_> = self
            .transformers
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
            .collect();
        items.sort_unstable();
        items
    }
}

impl Debug for TransformerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.list().into_iter().map(|(name, _)| name))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tests::utils::table_with_steps;

    struct TestTransformer {
        name: &'static str,
        steps: StepTable,
    }

    impl Transformer for TestTransformer {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test transformer"
        }

        fn steps(&self) -> &StepTable {
            &self.steps
        }
    }

    fn alpha(_config: &TransformerConfig) -> crate::Result<Box<dyn Transformer>> {
        Ok(Box::new(TestTransformer {
            name: "alpha",
            steps: table_with_steps("alpha", &["submit", "batch"]),
        }))
    }

    fn beta(config: &TransformerConfig) -> crate::Result<Box<dyn Transformer>> {
        if config.dry_run {
            return Err(JobspecError::SpecError("beta cannot dry run".to_string()));
        }
        Ok(Box::new(TestTransformer {
            name: "beta",
            steps: table_with_steps("beta", &["submit"]),
        }))
    }

    fn registry() -> TransformerRegistry {
        let mut registry = TransformerRegistry::new();
        registry
            .register_transformer("alpha", "First", alpha)
            .unwrap();
        registry.register_transformer("beta", "Second", beta).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_transformer() {
        let mut registry = registry();
        let r = registry.register_transformer("alpha", "Again", beta);
        assert!(matches!(r, Err(JobspecError::DuplicatePluginError(name)) if name == "alpha"));
    }

    #[test]
    fn test_missing_transformer() {
        let r = registry().create("gamma", &TransformerConfig::default());
        assert!(matches!(r, Err(JobspecError::PluginNotFoundError(name)) if name == "gamma"));
    }

    #[test]
    fn test_same_step_kind_in_two_transformers() {
        let registry = registry();
        let config = TransformerConfig::default();
        let a = registry.create("alpha", &config).unwrap();
        let b = registry.create("beta", &config).unwrap();
        assert!(a.steps().has_step("submit"));
        assert!(b.steps().has_step("submit"));
        assert!(!b.steps().has_step("batch"));
    }

    #[test]
    fn test_factory_receives_config() {
        let config = TransformerConfig {
            dry_run: true,
            wait: false,
        };
        assert!(registry().create("beta", &config).is_err());
        assert!(registry().create("alpha", &config).is_ok());
    }

    #[test]
    fn test_list_sorted() {
        assert_eq!(
            registry().list(),
            vec![("alpha", "First"), ("beta", "Second")]
        );
    }

    #[test]
    fn test_run_parses_and_executes() {
        let transformer = alpha(&TransformerConfig::default()).unwrap();
        let jobspec = Arc::new(
            JobSpec::parse(
                r#"
version: 1
tasks:
  - name: a
    command: hostname
groups:
  - name: g
"#,
            )
            .unwrap(),
        );
        let results = transformer.run(jobspec, Path::new("/tmp")).unwrap();
        let outputs: Vec<_> = results.into_iter().map(|r| r.output).collect();
        assert_eq!(outputs, vec!["submit a", "batch g"]);
    }

    #[test]
    fn test_parse_missing_step_kind() {
        let transformer = beta(&TransformerConfig::default()).unwrap();
        let jobspec = JobSpec::parse("version: 1\ntasks: []\ngroups:\n  - name: g\n").unwrap();
        let r = transformer.parse(Arc::new(jobspec));
        assert!(matches!(
            r,
            Err(JobspecError::StepNotFoundError { transformer, step }) if transformer == "beta" && step == "batch"
        ));
    }
}
