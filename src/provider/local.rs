use declarative::{Attributes, Provider, ProviderOutput, ProviderResult, ResourceId};

/// Provider that only computes ids.
///
/// The id is a blake3 digest of the identity and attributes, so the same
/// declaration always yields the same id. Outputs echo the attributes.
pub struct LocalProvider;

impl LocalProvider {
    fn output(resource: &ResourceId, attributes: &Attributes) -> ProviderOutput {
        let mut hasher = blake3::Hasher::new();
        hasher.update(resource.to_string().as_bytes());
        for (name, value) in attributes {
            hasher.update(&[0]);
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_string().as_bytes());
        }
        let digest = hasher.finalize().to_hex();
        let id = format!("{}-{}", resource.resource_type, &digest[..12]);

        let mut outputs = attributes.clone();
        outputs.insert("id".to_string(), serde_json::Value::String(id.clone()));
        ProviderOutput { id, outputs }
    }
}

impl Provider for LocalProvider {
    fn create(&self, resource: &ResourceId, attributes: &Attributes) -> ProviderResult<ProviderOutput> {
        log::debug!("local: create {}", resource);
        Ok(Self::output(resource, attributes))
    }

    fn update(
        &self,
        resource: &ResourceId,
        id: &str,
        _previous: &Attributes,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderOutput> {
        log::debug!("local: update {} ({})", resource, id);
        let mut output = Self::output(resource, attributes);
        // in-place updates keep their id
        output.id = id.to_string();
        output
            .outputs
            .insert("id".to_string(), serde_json::Value::String(id.to_string()));
        Ok(output)
    }

    fn destroy(&self, resource: &ResourceId, id: &str) -> ProviderResult<()> {
        log::debug!("local: destroy {} ({})", resource, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ids_are_deterministic() {
        let id = ResourceId::new("aws_vpc", "main");
        let a = LocalProvider.create(&id, &attrs(json!({"cidr": "10.0.0.0/16"}))).unwrap();
        let b = LocalProvider.create(&id, &attrs(json!({"cidr": "10.0.0.0/16"}))).unwrap();
        let c = LocalProvider.create(&id, &attrs(json!({"cidr": "10.1.0.0/16"}))).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("aws_vpc-"));
        assert_eq!(a.outputs["id"], json!(a.id));
        assert_eq!(a.outputs["cidr"], json!("10.0.0.0/16"));
    }

    #[test]
    fn test_update_keeps_id() {
        let id = ResourceId::new("aws_vpc", "main");
        let updated = LocalProvider
            .update(&id, "aws_vpc-abc", &Attributes::new(), &attrs(json!({"name": "x"})))
            .unwrap();
        assert_eq!(updated.id, "aws_vpc-abc");
        assert_eq!(updated.outputs["id"], json!("aws_vpc-abc"));
    }
}
