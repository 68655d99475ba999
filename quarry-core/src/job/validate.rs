//! Static checks over the resolved stages of a job.

use crate::error::ConfigError;
use crate::stage::Stage;
use std::collections::HashSet;

/// Check that stage names are unique and that every upstream (primary or
/// secondary) names a stage declared earlier. `stages` is in execution order.
pub fn validate_stages(stages: &[&dyn Stage]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for stage in stages {
        if !names.insert(stage.name()) {
            return Err(ConfigError::DuplicateStageName {
                name: stage.name().to_string(),
            });
        }
    }

    let mut declared = HashSet::new();
    for stage in stages {
        if let Some(upstream) = stage
            .upstreams()
            .into_iter()
            .find(|u| !declared.contains(u))
        {
            return Err(ConfigError::UnknownUpstream {
                stage: stage.name().to_string(),
                upstream: upstream.to_string(),
            });
        }
        declared.insert(stage.name());
    }
    Ok(())
}
