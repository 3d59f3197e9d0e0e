//! Declaration files
//!
//! Resources are declared as `[resource.<type>.<name>]` tables. String
//! values may interpolate other resources' outputs with `${type.name.attr}`;
//! those are parsed into typed expressions here, once, at load time.

use anyhow::{Context, Result};
use declarative::{Expr, Lifecycle, Reference, Resource, ResourceId, Segment, types::is_identifier};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Default declaration file when no `-f` is given
pub const DEFAULT_FILE: &str = "infra.toml";

/// Settings file name, skipped when scanning directories
const SETTINGS_FILE: &str = "terrace.toml";

/// `$${` escape, or `${...}` interpolation
static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\{|\$\{([^}]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("expected a [resource] table")]
    MissingResources,

    #[error("unknown top-level key '{0}', declarations live under [resource]")]
    UnknownKey(String),

    #[error("resource.{0} must be a table of named resources")]
    NotATypeTable(String),

    #[error("resource.{0} must be a table")]
    NotAResourceTable(String),

    #[error("invalid {kind} '{value}'")]
    InvalidName { kind: &'static str, value: String },

    #[error("{resource}.{attribute}: invalid reference '${{{text}}}', expected ${{type.name.attribute}}")]
    InvalidReference {
        resource: ResourceId,
        attribute: String,
        text: String,
    },

    #[error("{resource}.{attribute}: float value cannot be represented")]
    InvalidFloat {
        resource: ResourceId,
        attribute: String,
    },

    #[error("{resource}: invalid lifecycle block: {message}")]
    InvalidLifecycle {
        resource: ResourceId,
        message: String,
    },
}

/// Load declarations from files and directories, in path order.
pub fn load(paths: &[PathBuf]) -> Result<Vec<Resource>> {
    let default = [PathBuf::from(DEFAULT_FILE)];
    let paths = if paths.is_empty() { &default[..] } else { paths };

    let mut resources = Vec::new();
    for file in declaration_files(paths)? {
        let content = fs::read_to_string(&file)
            .with_context(|| format!("Could not read declarations: {}", file.display()))?;
        let parsed =
            parse(&content).with_context(|| format!("Invalid declarations in {}", file.display()))?;
        log::debug!("Loaded {} resources from {}", parsed.len(), file.display());
        resources.extend(parsed);
    }
    Ok(resources)
}

/// Expand directories into their `*.toml` files, sorted by path
fn declaration_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|p| is_declaration_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            anyhow::bail!("Declaration file not found: {}", path.display());
        }
    }
    Ok(files)
}

fn is_declaration_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
        && path.file_name().is_some_and(|name| name != SETTINGS_FILE)
}

/// Parse one declaration document
pub fn parse(content: &str) -> Result<Vec<Resource>> {
    let mut document: toml::Table = toml::from_str(content)?;
    let other_key = document.keys().find(|k| *k != "resource").cloned();
    if let Some(key) = other_key {
        return Err(SchemaError::UnknownKey(key).into());
    }

    let types = match document.remove("resource") {
        Some(toml::Value::Table(types)) => types,
        Some(_) | None => return Err(SchemaError::MissingResources.into()),
    };

    let mut resources = Vec::new();
    for (resource_type, named) in types {
        check_name("resource type", &resource_type)?;
        let toml::Value::Table(named) = named else {
            return Err(SchemaError::NotATypeTable(resource_type).into());
        };
        for (name, body) in named {
            check_name("resource name", &name)?;
            let id = ResourceId::new(resource_type.clone(), name);
            let toml::Value::Table(body) = body else {
                return Err(SchemaError::NotAResourceTable(id.to_string()).into());
            };
            resources.push(parse_resource(id, body)?);
        }
    }
    Ok(resources)
}

fn check_name(kind: &'static str, value: &str) -> Result<(), SchemaError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(SchemaError::InvalidName {
            kind,
            value: value.to_string(),
        })
    }
}

fn parse_resource(id: ResourceId, mut body: toml::Table) -> Result<Resource> {
    let lifecycle = match body.remove("lifecycle") {
        Some(value) => value
            .try_into::<Lifecycle>()
            .map_err(|e| SchemaError::InvalidLifecycle {
                resource: id.clone(),
                message: e.to_string(),
            })?,
        None => Lifecycle::default(),
    };

    let mut resource = Resource::new(id.resource_type.clone(), id.name.clone()).with_lifecycle(lifecycle);
    for (attribute, value) in body {
        let expr = to_expr(&id, &attribute, value)?;
        resource.attributes.insert(attribute, expr);
    }
    Ok(resource)
}

/// Convert a TOML value, keeping plain literals whenever nothing inside
/// refers to another resource.
fn to_expr(id: &ResourceId, attribute: &str, value: toml::Value) -> Result<Expr, SchemaError> {
    let expr = match value {
        toml::Value::String(s) => parse_string(id, attribute, &s)?,
        toml::Value::Integer(n) => Expr::Literal(n.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(|n| Expr::Literal(n.into()))
            .ok_or_else(|| SchemaError::InvalidFloat {
                resource: id.clone(),
                attribute: attribute.to_string(),
            })?,
        toml::Value::Boolean(b) => Expr::Literal(b.into()),
        toml::Value::Datetime(dt) => Expr::Literal(dt.to_string().into()),
        toml::Value::Array(items) => {
            let items = items
                .into_iter()
                .map(|item| to_expr(id, attribute, item))
                .collect::<Result<Vec<_>, _>>()?;
            collapse_list(items)
        }
        toml::Value::Table(table) => {
            let entries = table
                .into_iter()
                .map(|(k, v)| -> Result<(String, Expr), SchemaError> {
                    Ok((k, to_expr(id, attribute, v)?))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            collapse_map(entries)
        }
    };
    Ok(expr)
}

fn collapse_list(items: Vec<Expr>) -> Expr {
    if items.iter().all(|e| matches!(e, Expr::Literal(_))) {
        let values = items
            .into_iter()
            .filter_map(|e| match e {
                Expr::Literal(v) => Some(v),
                _ => None,
            })
            .collect();
        Expr::Literal(serde_json::Value::Array(values))
    } else {
        Expr::List(items)
    }
}

fn collapse_map(entries: BTreeMap<String, Expr>) -> Expr {
    if entries.values().all(|e| matches!(e, Expr::Literal(_))) {
        let values = entries
            .into_iter()
            .filter_map(|(k, e)| match e {
                Expr::Literal(v) => Some((k, v)),
                _ => None,
            })
            .collect();
        Expr::Literal(serde_json::Value::Object(values))
    } else {
        Expr::Map(entries)
    }
}

/// Split a string into text and `${...}` references.
///
/// A string that is exactly one reference becomes `Expr::Ref`, so the
/// referenced value keeps its JSON type.
fn parse_string(id: &ResourceId, attribute: &str, s: &str) -> Result<Expr, SchemaError> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut text = String::new();
    let mut last = 0;

    for caps in INTERPOLATION.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        text.push_str(&s[last..whole.start()]);
        last = whole.end();

        match caps.get(1) {
            None => text.push_str("${"),
            Some(inner) => {
                let inner = inner.as_str().trim();
                let reference =
                    Reference::parse(inner).ok_or_else(|| SchemaError::InvalidReference {
                        resource: id.clone(),
                        attribute: attribute.to_string(),
                        text: inner.to_string(),
                    })?;
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Ref(reference));
            }
        }
    }
    text.push_str(&s[last..]);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(match segments.as_slice() {
        [] => Expr::Literal(String::new().into()),
        [Segment::Text(t)] => Expr::Literal(t.clone().into()),
        [Segment::Ref(r)] => Expr::Ref(r.clone()),
        _ => Expr::Template(segments),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_declarations() {
        let resources = parse(
            r#"
            [resource.aws_vpc.main]
            cidr_block = "10.0.0.0/16"
            tags = { Name = "main" }

            [resource.aws_subnet.private]
            vpc_id = "${aws_vpc.main.id}"
            name = "private-${ aws_vpc.main.id }"
            count = 2

            [resource.aws_subnet.private.lifecycle]
            create_before_destroy = true
            replace_on = ["cidr_block"]
            depends_on = ["aws_vpc.main"]
            "#,
        )
        .unwrap();
        assert_eq!(resources.len(), 2);

        let subnet = resources.iter().find(|r| r.id == id("aws_subnet.private")).unwrap();
        assert_eq!(
            subnet.attributes["vpc_id"],
            Expr::reference(id("aws_vpc.main"), "id")
        );
        assert_eq!(
            subnet.attributes["name"],
            Expr::Template(vec![
                Segment::Text("private-".into()),
                Segment::Ref(Reference::new(id("aws_vpc.main"), "id")),
            ])
        );
        assert_eq!(subnet.attributes["count"], Expr::Literal(json!(2)));
        assert!(subnet.lifecycle.create_before_destroy);
        assert_eq!(subnet.lifecycle.depends_on, vec![id("aws_vpc.main")]);

        let vpc = resources.iter().find(|r| r.id == id("aws_vpc.main")).unwrap();
        assert_eq!(vpc.attributes["tags"], Expr::Literal(json!({"Name": "main"})));
    }

    #[test]
    fn test_nested_reference_keeps_structure() {
        let resources = parse(
            r#"
            [resource.aws_instance.web]
            security_groups = ["sg-base", "${aws_security_group.web.id}"]
            "#,
        )
        .unwrap();
        match &resources[0].attributes["security_groups"] {
            Expr::List(items) => {
                assert_eq!(items[0], Expr::Literal(json!("sg-base")));
                assert!(matches!(items[1], Expr::Ref(_)));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_escaped_interpolation_is_literal() {
        let resources = parse(
            r#"
            [resource.script.hello]
            body = "echo $${HOME}"
            "#,
        )
        .unwrap();
        assert_eq!(
            resources[0].attributes["body"],
            Expr::Literal(json!("echo ${HOME}"))
        );
    }

    #[test]
    fn test_invalid_reference() {
        let err = parse(
            r#"
            [resource.aws_subnet.a]
            vpc_id = "${aws_vpc.main}"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid reference"));
    }

    #[test]
    fn test_unknown_lifecycle_field() {
        let result = parse(
            r#"
            [resource.aws_vpc.main.lifecycle]
            ignore_changes = ["tags"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_key() {
        assert!(parse("[variable.region]\ndefault = \"eu\"\n").is_err());
    }

    #[test]
    fn test_load_directory_skips_settings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("network.toml"),
            "[resource.aws_vpc.main]\ncidr_block = \"10.0.0.0/16\"\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("compute")).unwrap();
        fs::write(
            dir.path().join("compute").join("web.toml"),
            "[resource.aws_instance.web]\nsubnet = \"${aws_vpc.main.id}\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("terrace.toml"), "[apply]\njobs = 2\n").unwrap();
        fs::write(dir.path().join("README.md"), "not toml").unwrap();

        let resources = load(&[dir.path().to_path_buf()]).unwrap();
        let ids: Vec<String> = resources.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["aws_instance.web", "aws_vpc.main"]);
    }

    #[test]
    fn test_missing_file() {
        assert!(load(&[PathBuf::from("/nonexistent/infra.toml")]).is_err());
    }
}
