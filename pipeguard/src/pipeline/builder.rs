//! Pipeline builder with validation.

use super::spec::{PipelineSpec, StageCondition, StageSpec};
use crate::errors::{codes, ConfigSuggestions, ConfigurationError};
use std::collections::HashMap;

/// Builder for creating validated pipeline specifications.
///
/// Every stage is validated as it is added, so an invalid stage is reported
/// at the line that adds it.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    spec: PipelineSpec,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            spec: PipelineSpec::new(project),
        }
    }

    /// Sets the build identifier.
    #[must_use]
    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.spec.build_id = build_id.into();
        self
    }

    /// Adds a notification recipient.
    #[must_use]
    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.spec.recipients.push(address.into());
        self
    }

    /// Sets the timeout for stages that don't declare one.
    #[must_use]
    pub fn default_stage_timeout_secs(mut self, secs: f64) -> Self {
        self.spec.default_stage_timeout_secs = Some(secs);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.spec.metadata.insert(key.into(), value);
        self
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid, its name is taken, or its
    /// condition references a stage that hasn't been added yet.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, ConfigurationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage specification in place.
    ///
    /// # Errors
    ///
    /// See [`PipelineBuilder::stage`].
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), ConfigurationError> {
        spec.validate()?;

        if self.has_stage(&spec.name) {
            return Err(ConfigurationError::duplicate_stage(&spec.name));
        }

        if let Some(StageCondition::StageSucceeded { stage: dep }) = &spec.when {
            if !self.has_stage(dep) {
                return Err(ConfigurationError::new(
                    codes::CONDITION,
                    format!("Stage '{}' is conditioned on unknown stage '{}'", spec.name, dep),
                )
                .with_stages(vec![spec.name.clone(), dep.clone()])
                .with_fix_hint(
                    ConfigSuggestions::get(codes::CONDITION)
                        .unwrap_or("Ensure the referenced stage is added first."),
                ));
            }
        }

        self.spec.stages.push(spec);
        Ok(())
    }

    /// Appends the stages of another builder.
    ///
    /// Identical stage definitions are merged; differing definitions under the
    /// same name are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if there are conflicting stage definitions.
    pub fn compose(mut self, other: Self) -> Result<Self, ConfigurationError> {
        let existing: HashMap<String, StageSpec> = self
            .spec
            .stages
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();

        for stage in other.spec.stages {
            match existing.get(&stage.name) {
                Some(current) if current == &stage => {}
                Some(_) => {
                    return Err(ConfigurationError::new(
                        codes::DUPLICATE,
                        format!(
                            "Stage '{}' has different definitions in composed pipelines",
                            stage.name
                        ),
                    )
                    .with_stages(vec![stage.name.clone()])
                    .with_fix_hint(
                        "Rename one of the stages or ensure they have identical configurations.",
                    ));
                }
                None => self.add_stage_spec(stage)?,
            }
        }

        for recipient in other.spec.recipients {
            if !self.spec.recipients.contains(&recipient) {
                self.spec.recipients.push(recipient);
            }
        }

        Ok(self)
    }

    /// Builds the pipeline specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or the project name is blank.
    pub fn build(self) -> Result<PipelineSpec, ConfigurationError> {
        self.spec.validate()?;
        Ok(self.spec)
    }

    /// Returns the project name.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.spec.project
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.spec.stages.len()
    }

    /// Returns true if a stage with the given name exists.
    #[must_use]
    pub fn has_stage(&self, name: &str) -> bool {
        self.spec.stages.iter().any(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StagePolicy;
    use crate::interfaces::CommandSpec;
    use pretty_assertions::assert_eq;

    fn cmd(name: &str) -> StageSpec {
        StageSpec::command(name, CommandSpec::new("true"))
    }

    #[test]
    fn test_builder_basic() {
        let spec = PipelineBuilder::new("webapp")
            .build_id("7")
            .recipient("dev@example.com")
            .stage(cmd("install"))
            .unwrap()
            .stage(cmd("test").with_policy(StagePolicy::WarnOnError))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(spec.stage_names(), vec!["install", "test"]);
        assert_eq!(spec.build_id, "7");
        assert_eq!(spec.recipients, vec!["dev@example.com".to_string()]);
    }

    #[test]
    fn test_builder_duplicate_stage() {
        let err = PipelineBuilder::new("webapp")
            .stage(cmd("scan"))
            .unwrap()
            .stage(cmd("scan"))
            .unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE);
    }

    #[test]
    fn test_builder_unknown_condition() {
        let err = PipelineBuilder::new("webapp")
            .stage(cmd("zap").when(StageCondition::StageSucceeded {
                stage: "deploy".to_string(),
            }))
            .unwrap_err();
        assert_eq!(err.code, codes::CONDITION);
    }

    #[test]
    fn test_builder_empty() {
        let err = PipelineBuilder::new("webapp").build().unwrap_err();
        assert_eq!(err.code, codes::EMPTY);
    }

    #[test]
    fn test_builder_compose() {
        let checks = PipelineBuilder::new("webapp")
            .stage(cmd("install"))
            .unwrap()
            .stage(cmd("lint"))
            .unwrap();
        let security = PipelineBuilder::new("security")
            .recipient("sec@example.com")
            .stage(cmd("install"))
            .unwrap()
            .stage(cmd("bandit"))
            .unwrap();

        let spec = checks.compose(security).unwrap().build().unwrap();
        assert_eq!(spec.stage_names(), vec!["install", "lint", "bandit"]);
        assert_eq!(spec.recipients, vec!["sec@example.com".to_string()]);
    }

    #[test]
    fn test_builder_compose_conflict() {
        let a = PipelineBuilder::new("a").stage(cmd("scan")).unwrap();
        let b = PipelineBuilder::new("b")
            .stage(cmd("scan").with_policy(StagePolicy::IgnoreError))
            .unwrap();

        let err = a.compose(b).unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE);
        assert_eq!(err.stages, vec!["scan".to_string()]);
    }
}
