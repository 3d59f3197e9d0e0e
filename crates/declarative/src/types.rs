//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Concrete attribute values, as stored in state and sent to providers.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identity of a resource: `(type, logical name)`, written `type.name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    pub resource_type: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((t, n)) if is_identifier(t) && is_identifier(n) => Ok(Self::new(t, n)),
            _ => Err(format!("invalid resource identity '{s}', expected type.name")),
        }
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// Whether a string is a valid type, name or attribute segment.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A reference to a producer's output attribute: `type.name.attribute`.
///
/// The attribute may be a dotted path into nested outputs
/// (`aws_vpc.main.tags.Name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub target: ResourceId,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parse `type.name.attribute[.path...]`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '.');
        let resource_type = parts.next()?;
        let name = parts.next()?;
        let attribute = parts.next()?;
        let valid = is_identifier(resource_type)
            && is_identifier(name)
            && attribute.split('.').all(is_identifier);
        valid.then(|| Self::new(ResourceId::new(resource_type, name), attribute))
    }

    /// Look the referenced path up in a set of outputs.
    pub fn lookup<'a>(&self, outputs: &'a Attributes) -> Option<&'a serde_json::Value> {
        let mut segments = self.attribute.split('.');
        let mut current = outputs.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                serde_json::Value::Object(map) => map.get(segment)?,
                serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Top-level attribute name (first path segment).
    pub fn root_attribute(&self) -> &str {
        self.attribute
            .split_once('.')
            .map_or(self.attribute.as_str(), |(root, _)| root)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// One piece of a string template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// A declared attribute value, possibly depending on other resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(serde_json::Value),
    Ref(Reference),
    Template(Vec<Segment>),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
}

impl Expr {
    /// Build a reference expression.
    pub fn reference(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self::Ref(Reference::new(target, attribute))
    }

    /// All references contained in this expression.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(r) => out.push(r),
            Self::Template(segments) => out.extend(segments.iter().filter_map(|s| match s {
                Segment::Ref(r) => Some(r),
                Segment::Text(_) => None,
            })),
            Self::List(items) => items.iter().for_each(|e| e.collect_references(out)),
            Self::Map(map) => map.values().for_each(|e| e.collect_references(out)),
        }
    }

    /// Resolve the expression, looking references up through `lookup`.
    ///
    /// Any unknown sub-value makes the whole expression unknown.
    pub fn resolve<E, F>(&self, lookup: &mut F) -> Result<Planned, E>
    where
        F: FnMut(&Reference) -> Result<Planned, E>,
    {
        match self {
            Self::Literal(v) => Ok(Planned::Known(v.clone())),
            Self::Ref(r) => lookup(r),
            Self::Template(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => rendered.push_str(t),
                        Segment::Ref(r) => match lookup(r)? {
                            Planned::Known(v) => rendered.push_str(&render_value(&v)),
                            Planned::Unknown => return Ok(Planned::Unknown),
                        },
                    }
                }
                Ok(Planned::Known(serde_json::Value::String(rendered)))
            }
            Self::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.resolve(lookup)? {
                        Planned::Known(v) => values.push(v),
                        Planned::Unknown => return Ok(Planned::Unknown),
                    }
                }
                Ok(Planned::Known(serde_json::Value::Array(values)))
            }
            Self::Map(map) => {
                let mut values = serde_json::Map::new();
                for (key, item) in map {
                    match item.resolve(lookup)? {
                        Planned::Known(v) => {
                            values.insert(key.clone(), v);
                        }
                        Planned::Unknown => return Ok(Planned::Unknown),
                    }
                }
                Ok(Planned::Known(serde_json::Value::Object(values)))
            }
        }
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Self::Literal(serde_json::Value::String(s.to_string()))
    }
}

impl From<serde_json::Value> for Expr {
    fn from(v: serde_json::Value) -> Self {
        Self::Literal(v)
    }
}

/// Render a value for string interpolation.
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A planned attribute value: known now, or only after apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Planned {
    Known(serde_json::Value),
    Unknown,
}

impl Planned {
    pub fn known(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

/// Per-resource lifecycle settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Lifecycle {
    /// Create the replacement before destroying the old instance
    pub create_before_destroy: bool,
    /// Extra attributes whose change forces replacement
    pub replace_on: Vec<String>,
    /// Explicit ordering edges that carry no value
    pub depends_on: Vec<ResourceId>,
    /// Refuse to plan a destroy (or replace) of this resource
    pub prevent_destroy: bool,
}

/// A resource declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: BTreeMap<String, Expr>,
    pub lifecycle: Lifecycle,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: BTreeMap::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Set an attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the lifecycle block
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Every resource this declaration depends on, deduplicated, in
    /// first-seen order.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps: Vec<ResourceId> = Vec::new();
        let referenced = self
            .attributes
            .values()
            .flat_map(Expr::references)
            .map(|r| &r.target);
        for id in referenced.chain(self.lifecycle.depends_on.iter()) {
            if !deps.contains(id) {
                deps.push(id.clone());
            }
        }
        deps
    }
}

/// What to do with the rest of the run when a node fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Start no new work after the first failure
    #[default]
    Halt,
    /// Keep applying branches that do not depend on the failure
    Continue,
}

/// Retry settings for transient provider errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel provider calls
    pub jobs: usize,
    /// Behaviour after a node failure
    pub failure_policy: FailurePolicy,
    /// Retry settings for transient provider errors
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            failure_policy: FailurePolicy::Halt,
            retry: RetryConfig::default(),
        }
    }
}

/// Outcome of a single change set entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyResult {
    /// Resource was created
    Created,
    /// Resource was updated in place
    Modified,
    /// Resource was destroyed and created again
    Replaced,
    /// Resource was destroyed
    Removed,
    /// Apply failed
    Failed { error: String },
    /// Entry never started
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Modified | Self::Replaced | Self::Removed
        )
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub replaced: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.replaced + self.removed
    }

    /// Check if execution was fully successful (nothing failed or skipped)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of entries processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Replaced => self.replaced += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}
