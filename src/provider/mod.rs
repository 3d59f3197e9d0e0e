//! Built-in providers
//!
//! - `local`: deterministic ids, no external system
//! - `exec`: one external program call per operation, JSON on stdin/stdout

mod exec;
mod local;

pub use exec::ExecProvider;
pub use local::LocalProvider;

use crate::config::{ProviderKind, Settings};
use anyhow::{Context, Result};
use declarative::{Attributes, Provider, ProviderOutput, ProviderResult, ResourceId};
use std::collections::BTreeMap;

/// Build the provider selected in `[provider]`
pub fn from_settings(settings: &Settings) -> Result<Box<dyn Provider>> {
    let inner: Box<dyn Provider> = match settings.provider.kind {
        ProviderKind::Local => Box::new(LocalProvider),
        ProviderKind::Exec => {
            let command = settings
                .provider
                .command
                .as_deref()
                .context("[provider] kind = \"exec\" requires a command")?;
            log::debug!("Using exec provider: {}", command);
            Box::new(ExecProvider::new(command, settings.provider.args.clone()))
        }
    };
    Ok(Box::new(WithSchema {
        inner,
        replace_on: settings.replace_on(),
    }))
}

/// Adds `[schema.<type>] replace_on` to a provider's own triggers
struct WithSchema {
    inner: Box<dyn Provider>,
    replace_on: BTreeMap<String, Vec<String>>,
}

impl Provider for WithSchema {
    fn create(&self, resource: &ResourceId, attributes: &Attributes) -> ProviderResult<ProviderOutput> {
        self.inner.create(resource, attributes)
    }

    fn update(
        &self,
        resource: &ResourceId,
        id: &str,
        previous: &Attributes,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderOutput> {
        self.inner.update(resource, id, previous, attributes)
    }

    fn destroy(&self, resource: &ResourceId, id: &str) -> ProviderResult<()> {
        self.inner.destroy(resource, id)
    }

    fn replace_triggers(&self, resource_type: &str) -> Vec<String> {
        let mut triggers = self.inner.replace_triggers(resource_type);
        if let Some(extra) = self.replace_on.get(resource_type) {
            triggers.extend(extra.iter().cloned());
        }
        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_triggers_added() {
        let settings = Settings::parse("[schema.aws_vpc]\nreplace_on = [\"cidr_block\"]\n").unwrap();
        let provider = from_settings(&settings).unwrap();
        assert_eq!(provider.replace_triggers("aws_vpc"), vec!["cidr_block"]);
        assert!(provider.replace_triggers("aws_subnet").is_empty());
    }

    #[test]
    fn test_exec_requires_command() {
        let settings = Settings::parse("[provider]\nkind = \"exec\"\n").unwrap();
        assert!(from_settings(&settings).is_err());
    }
}
