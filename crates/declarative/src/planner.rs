//! Planner - diffs declarations against state and orders the change set

use crate::diff::{AttributeDiff, diff_attributes, initial_attributes, removed_attributes};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::provider::Provider;
use crate::state::{Snapshot, StateRecord};
use crate::types::{Attributes, Expr, Planned, Reference, Resource, ResourceId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Kind of change for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    /// Destroy and create again (order set by `create_before_destroy`)
    Replace,
    Destroy,
}

impl ChangeAction {
    /// Whether the entry ends with the resource existing
    pub fn is_create_like(self) -> bool {
        !matches!(self, Self::Destroy)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// One entry of a change set
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub id: ResourceId,
    pub action: ChangeAction,
    /// Attribute-level changes
    pub diff: Vec<AttributeDiff>,
    /// For `Replace`: create the new instance before destroying the old one
    pub create_before_destroy: bool,
    /// Indices of entries that must commit before this one starts
    pub depends_on: Vec<usize>,
    /// Declared expressions, resolved again at apply time
    #[serde(skip)]
    pub expressions: BTreeMap<String, Expr>,
    /// Dependencies to record in state after apply
    #[serde(skip)]
    pub dependencies: Vec<ResourceId>,
    /// For `Destroy`: only this old instance goes, the record stays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
    /// For `Destroy`: first half of a destroy-first `Replace` of the same
    /// identity, split out so it can run ahead of its producers
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replacing: bool,
}

impl ChangeEntry {
    fn destroy(id: ResourceId, record: &StateRecord) -> Self {
        Self {
            id,
            action: ChangeAction::Destroy,
            diff: removed_attributes(&record.attributes),
            create_before_destroy: false,
            depends_on: Vec::new(),
            expressions: BTreeMap::new(),
            dependencies: Vec::new(),
            deposed: None,
            replacing: false,
        }
    }

    fn destroy_half(id: ResourceId, record: &StateRecord) -> Self {
        Self {
            replacing: true,
            ..Self::destroy(id, record)
        }
    }

    fn destroy_deposed(id: ResourceId, instance: String) -> Self {
        Self {
            id,
            action: ChangeAction::Destroy,
            diff: Vec::new(),
            create_before_destroy: false,
            depends_on: Vec::new(),
            expressions: BTreeMap::new(),
            dependencies: Vec::new(),
            deposed: Some(instance),
            replacing: false,
        }
    }

    /// Attributes that force replacement
    pub fn replace_reasons(&self) -> Vec<&str> {
        self.diff
            .iter()
            .filter(|d| d.forces_replacement)
            .map(|d| d.name.as_str())
            .collect()
    }
}

/// Counts per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.destroy
    }
}

/// Ordered change set
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    /// Check if there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in execution order
    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter()
    }

    /// Find the main entry for an identity, ignoring destroys of old instances
    pub fn get(&self, id: &ResourceId) -> Option<&ChangeEntry> {
        self.entries
            .iter()
            .find(|e| &e.id == id && !e.replacing && e.deposed.is_none())
    }

    /// Count entries by action; a split replacement counts once
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in self.entries.iter().filter(|e| !e.replacing) {
            match entry.action {
                ChangeAction::Create => summary.create += 1,
                ChangeAction::Update => summary.update += 1,
                ChangeAction::Replace => summary.replace += 1,
                ChangeAction::Destroy => summary.destroy += 1,
            }
        }
        summary
    }

    /// Keep only entries matching a target and everything they wait for.
    ///
    /// Target format: "type" or "type.name"
    pub fn filter_by_target(self, targets: &[Target]) -> Self {
        if targets.is_empty() {
            return self;
        }

        let mut keep = vec![false; self.entries.len()];
        let mut pending: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| targets.iter().any(|t| t.matches(&e.id)))
            .map(|(i, _)| i)
            .collect();
        while let Some(i) = pending.pop() {
            if !keep[i] {
                keep[i] = true;
                pending.extend(&self.entries[i].depends_on);
            }
        }

        let mut remap = HashMap::new();
        let mut entries = Vec::new();
        for (i, entry) in self.entries.into_iter().enumerate() {
            if keep[i] {
                remap.insert(i, entries.len());
                entries.push(entry);
            }
        }
        for entry in &mut entries {
            entry.depends_on = entry.depends_on.iter().map(|d| remap[d]).collect();
        }
        Self { entries }
    }
}

/// A `-target` selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Everything of one type
    Type(String),
    /// A single resource
    Resource(ResourceId),
}

impl Target {
    /// Parse a target string like "type" or "type.name"
    pub fn parse(target: &str) -> Self {
        match target.parse::<ResourceId>() {
            Ok(id) => Self::Resource(id),
            Err(_) => Self::Type(target.to_string()),
        }
    }

    pub fn matches(&self, id: &ResourceId) -> bool {
        match self {
            Self::Type(t) => id.resource_type == *t,
            Self::Resource(r) => r == id,
        }
    }
}

/// How a producer's outputs look to its consumers during planning
enum ProducerView<'a> {
    /// No change: stored outputs are final
    Unchanged(&'a Attributes),
    /// Being created or replaced: nothing is known until apply
    Pending,
    /// Updated in place: new declared values, else stored outputs
    Updating {
        planned: BTreeMap<String, Planned>,
        outputs: &'a Attributes,
    },
}

impl ProducerView<'_> {
    fn lookup(&self, consumer: &ResourceId, reference: &Reference) -> Result<Planned> {
        let missing = || Error::MissingOutput {
            consumer: consumer.clone(),
            reference: reference.clone(),
        };
        match self {
            Self::Pending => Ok(Planned::Unknown),
            Self::Unchanged(outputs) => reference
                .lookup(outputs)
                .map(|v| Planned::Known(v.clone()))
                .ok_or_else(missing),
            Self::Updating { planned, outputs } => match planned.get(reference.root_attribute()) {
                Some(Planned::Unknown) => Ok(Planned::Unknown),
                Some(Planned::Known(root)) => {
                    let scope: Attributes =
                        [(reference.root_attribute().to_string(), root.clone())].into();
                    reference
                        .lookup(&scope)
                        .map(|v| Planned::Known(v.clone()))
                        .ok_or_else(missing)
                }
                None => reference
                    .lookup(outputs)
                    .map(|v| Planned::Known(v.clone()))
                    .ok_or_else(missing),
            },
        }
    }
}

/// Produces change sets from a graph and a state snapshot
pub struct Planner<'a> {
    graph: &'a Graph,
    snapshot: &'a Snapshot,
    provider: Option<&'a dyn Provider>,
}

impl<'a> Planner<'a> {
    pub fn new(graph: &'a Graph, snapshot: &'a Snapshot) -> Self {
        Self {
            graph,
            snapshot,
            provider: None,
        }
    }

    /// Use a provider's replace triggers in addition to `replace_on`
    pub fn with_provider(mut self, provider: &'a dyn Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    fn replace_triggers(&self, resource: &Resource) -> BTreeSet<String> {
        let mut triggers: BTreeSet<String> =
            resource.lifecycle.replace_on.iter().cloned().collect();
        if let Some(provider) = self.provider {
            triggers.extend(provider.replace_triggers(&resource.id.resource_type));
        }
        triggers
    }

    /// Plan the changes that reconcile state with the declarations
    pub fn plan(&self) -> Result<ChangeSet> {
        let mut views: HashMap<&ResourceId, ProducerView<'_>> = HashMap::new();
        let mut entry_of: HashMap<&ResourceId, usize> = HashMap::new();
        // nearest changing ancestors, looking through no-op nodes
        let mut waits: HashMap<&ResourceId, BTreeSet<usize>> = HashMap::new();
        let mut entries: Vec<ChangeEntry> = Vec::new();

        for resource in self.graph.in_order() {
            let id = &resource.id;
            let planned = self.resolve(resource, &views)?;
            let record = self.snapshot.get(id);

            let (action, diff, view) = match record {
                None => (
                    Some(ChangeAction::Create),
                    initial_attributes(&planned),
                    ProducerView::Pending,
                ),
                Some(record) => {
                    let triggers = self.replace_triggers(resource);
                    let diff = diff_attributes(&record.attributes, &planned, &triggers);
                    if diff.is_empty() {
                        (None, diff, ProducerView::Unchanged(&record.outputs))
                    } else if diff.iter().any(|d| d.forces_replacement) {
                        if resource.lifecycle.prevent_destroy {
                            return Err(Error::PreventDestroy {
                                identity: id.clone(),
                            });
                        }
                        (Some(ChangeAction::Replace), diff, ProducerView::Pending)
                    } else {
                        (
                            Some(ChangeAction::Update),
                            diff,
                            ProducerView::Updating {
                                planned,
                                outputs: &record.outputs,
                            },
                        )
                    }
                }
            };

            let mut depends_on = BTreeSet::new();
            for producer in self.graph.producers_of(id) {
                match entry_of.get(producer) {
                    Some(&e) => {
                        depends_on.insert(e);
                    }
                    None => depends_on.extend(waits.get(producer).into_iter().flatten()),
                }
            }

            if let Some(action) = action {
                log::debug!("Planned {} for {}", action, id);
                entry_of.insert(id, entries.len());
                entries.push(ChangeEntry {
                    id: id.clone(),
                    action,
                    diff,
                    create_before_destroy: resource.lifecycle.create_before_destroy,
                    depends_on: depends_on.iter().copied().collect(),
                    expressions: resource.attributes.clone(),
                    dependencies: resource.dependencies(),
                    deposed: None,
                    replacing: false,
                });
            }
            waits.insert(id, depends_on);
            views.insert(id, view);
        }

        // orphans: in state, no longer declared
        let orphans: Vec<(&ResourceId, &StateRecord)> = self
            .snapshot
            .iter()
            .filter(|(id, _)| !self.graph.contains(id))
            .collect();
        let first_orphan = entries.len();
        for (id, record) in &orphans {
            log::debug!("Planned destroy for orphan {}", id);
            entries.push(ChangeEntry::destroy((*id).clone(), record));
        }
        for (offset, (orphan, _)) in orphans.iter().enumerate() {
            let mut depends_on = BTreeSet::new();
            for (other, (dependent, record)) in orphans.iter().enumerate() {
                if other != offset && record.dependencies.contains(orphan) {
                    log::trace!("{} is destroyed before {}", dependent, orphan);
                    depends_on.insert(first_orphan + other);
                }
            }
            for (i, entry) in entries[..first_orphan].iter().enumerate() {
                let previously_depended = self
                    .snapshot
                    .get(&entry.id)
                    .is_some_and(|r| r.dependencies.contains(orphan));
                if previously_depended {
                    depends_on.insert(i);
                }
            }
            entries[first_orphan + offset].depends_on = depends_on.into_iter().collect();
        }

        let orphan_destroys: HashMap<&ResourceId, usize> = orphans
            .iter()
            .enumerate()
            .map(|(offset, (id, _))| (*id, first_orphan + offset))
            .collect();
        self.order_replaced_producers(&mut entries, &orphan_destroys);
        self.clean_up_deposed(&mut entries);
        for entry in &mut entries {
            entry.depends_on.sort_unstable();
            entry.depends_on.dedup();
        }

        order_entries(entries)
    }

    /// Identities whose last-applied record depended on `producer`
    fn old_dependents<'s>(
        &'s self,
        producer: &'s ResourceId,
    ) -> impl Iterator<Item = &'s ResourceId> {
        self.snapshot
            .iter()
            .filter(move |(_, record)| record.dependencies.contains(producer))
            .map(|(id, _)| id)
    }

    /// Destroy old dependents before the old instance of a replaced producer.
    ///
    /// Orphans already have a destroy entry. A dependent that is itself
    /// replaced destroy-first gets its destroy half split into a separate
    /// entry, since its create half still has to wait for the producer.
    fn order_replaced_producers(
        &self,
        entries: &mut Vec<ChangeEntry>,
        orphan_destroys: &HashMap<&ResourceId, usize>,
    ) {
        let replaced: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.action == ChangeAction::Replace)
            .map(|(i, _)| i)
            .collect();
        let destroy_first: HashMap<ResourceId, usize> = replaced
            .iter()
            .filter(|&&i| !entries[i].create_before_destroy)
            .map(|&i| (entries[i].id.clone(), i))
            .collect();

        let mut split = BTreeSet::new();
        for &p in &replaced {
            split.extend(
                self.old_dependents(&entries[p].id)
                    .filter(|d| destroy_first.contains_key(*d))
                    .cloned(),
            );
        }

        let mut halves: HashMap<ResourceId, usize> = HashMap::new();
        for dependent in split {
            let Some(record) = self.snapshot.get(&dependent) else {
                continue;
            };
            let half = entries.len();
            log::debug!("Destroying old {} ahead of its replacement", dependent);
            entries.push(ChangeEntry::destroy_half(dependent.clone(), record));
            entries[destroy_first[&dependent]].depends_on.push(half);
            halves.insert(dependent, half);
        }

        // an orphan referenced by a split dependent only waits for its destroy half
        for &o in orphan_destroys.values() {
            let remapped: Vec<usize> = entries[o]
                .depends_on
                .iter()
                .map(|&d| match entries[d].action {
                    ChangeAction::Replace => halves.get(&entries[d].id).copied().unwrap_or(d),
                    _ => d,
                })
                .collect();
            entries[o].depends_on = remapped;
        }

        for &p in &replaced {
            let producer = entries[p].id.clone();
            let destroys_old = halves.get(&producer).copied().unwrap_or(p);
            let waits: Vec<usize> = self
                .old_dependents(&producer)
                .filter_map(|d| orphan_destroys.get(d).or_else(|| halves.get(d)).copied())
                .collect();
            for &w in &waits {
                log::trace!("{} is destroyed before {}", entries[w].id, producer);
            }
            entries[destroys_old].depends_on.extend(waits);
        }
    }

    /// Destroy instances left behind by an interrupted create-before-destroy.
    ///
    /// Every other entry of the identity waits for the cleanup. Orphans
    /// are skipped: their destroy removes deposed instances too.
    fn clean_up_deposed(&self, entries: &mut Vec<ChangeEntry>) {
        for (id, record) in self.snapshot {
            let Some(instance) = &record.deposed else {
                continue;
            };
            if !self.graph.contains(id) {
                continue;
            }
            let cleanup = entries.len();
            for entry in entries.iter_mut().filter(|e| &e.id == id) {
                entry.depends_on.push(cleanup);
            }
            log::debug!("Planned destroy of deposed instance {} of {}", instance, id);
            entries.push(ChangeEntry::destroy_deposed(id.clone(), instance.clone()));
        }
    }

    fn resolve(
        &self,
        resource: &Resource,
        views: &HashMap<&ResourceId, ProducerView<'_>>,
    ) -> Result<BTreeMap<String, Planned>> {
        let mut lookup = |reference: &Reference| -> Result<Planned> {
            views
                .get(&reference.target)
                .ok_or_else(|| Error::UnresolvedReference {
                    consumer: resource.id.clone(),
                    producer: reference.target.clone(),
                })?
                .lookup(&resource.id, reference)
        };
        resource
            .attributes
            .iter()
            .map(|(name, expr)| -> Result<(String, Planned)> {
                Ok((name.clone(), expr.resolve(&mut lookup)?))
            })
            .collect()
    }
}

/// Plan a full teardown of everything in state.
///
/// Dependents are destroyed before their dependencies, using the
/// dependencies recorded at apply time. When declarations are given,
/// `prevent_destroy` is honoured.
pub fn plan_destroy(snapshot: &Snapshot, graph: Option<&Graph>) -> Result<ChangeSet> {
    if let Some(graph) = graph
        && let Some(protected) = snapshot
            .keys()
            .find(|id| graph.get(id).is_some_and(|r| r.lifecycle.prevent_destroy))
    {
        return Err(Error::PreventDestroy {
            identity: protected.clone(),
        });
    }

    let ids: Vec<&ResourceId> = snapshot.keys().collect();
    let position: HashMap<&ResourceId, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut entries: Vec<ChangeEntry> = snapshot
        .iter()
        .map(|(id, record)| ChangeEntry::destroy(id.clone(), record))
        .collect();
    for (dependent, record) in snapshot {
        for dependency in &record.dependencies {
            if let Some(&target) = position.get(dependency) {
                entries[target].depends_on.push(position[dependent]);
            }
        }
    }
    for entry in &mut entries {
        entry.depends_on.sort_unstable();
        entry.depends_on.dedup();
    }

    order_entries(entries)
}

/// Sort entries so that everything an entry waits for comes first.
///
/// Kahn's algorithm with ties broken by construction order; the
/// `depends_on` indices are rewritten to the new positions.
fn order_entries(entries: Vec<ChangeEntry>) -> Result<ChangeSet> {
    let n = entries.len();
    let mut remaining: Vec<usize> = entries.iter().map(|e| e.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, entry) in entries.iter().enumerate() {
        for &d in &entry.depends_on {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < n {
        let path = (0..n)
            .filter(|i| remaining[*i] > 0)
            .map(|i| entries[i].id.clone())
            .collect();
        return Err(Error::Cycle { path });
    }

    let mut new_index = vec![0; n];
    for (new, &old) in order.iter().enumerate() {
        new_index[old] = new;
    }
    let mut slots: Vec<Option<ChangeEntry>> = entries.into_iter().map(Some).collect();
    let entries = order
        .iter()
        .filter_map(|&old| slots[old].take())
        .map(|mut entry| {
            entry.depends_on = entry.depends_on.iter().map(|&d| new_index[d]).collect();
            entry.depends_on.sort_unstable();
            entry
        })
        .collect();
    Ok(ChangeSet { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Lifecycle;
    use serde_json::json;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn record(attrs: serde_json::Value, outputs: serde_json::Value, deps: &[&str]) -> StateRecord {
        let to_map = |v: serde_json::Value| -> Attributes {
            serde_json::from_value(v).unwrap()
        };
        let mut record = StateRecord::new("x-1", to_map(attrs), to_map(outputs));
        record.dependencies = deps.iter().map(|d| id(d)).collect();
        record
    }

    fn vpc() -> Resource {
        Resource::new("aws_vpc", "main").attr("cidr_block", "10.0.0.0/16")
    }

    fn subnet() -> Resource {
        Resource::new("aws_subnet", "a")
            .attr("vpc_id", Expr::reference(id("aws_vpc.main"), "id"))
            .attr("cidr_block", "10.0.1.0/24")
    }

    fn plan(resources: Vec<Resource>, snapshot: &Snapshot) -> ChangeSet {
        let graph = Graph::build(resources).unwrap();
        Planner::new(&graph, snapshot).plan().unwrap()
    }

    fn actions(set: &ChangeSet) -> Vec<(String, ChangeAction)> {
        set.iter().map(|e| (e.id.to_string(), e.action)).collect()
    }

    #[test]
    fn test_empty_state_creates_in_order() {
        let set = plan(vec![subnet(), vpc()], &Snapshot::new());
        assert_eq!(
            actions(&set),
            vec![
                ("aws_vpc.main".to_string(), ChangeAction::Create),
                ("aws_subnet.a".to_string(), ChangeAction::Create),
            ]
        );
        assert_eq!(set.entries[1].depends_on, vec![0]);
        let vpc_id = set.entries[1].diff.iter().find(|d| d.name == "vpc_id").unwrap();
        assert!(vpc_id.is_unknown());
    }

    #[test]
    fn test_applied_state_is_noop() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(
                json!({"cidr_block": "10.0.0.0/16"}),
                json!({"id": "vpc-1", "cidr_block": "10.0.0.0/16"}),
                &[],
            ),
        );
        snapshot.insert(
            id("aws_subnet.a"),
            record(
                json!({"vpc_id": "vpc-1", "cidr_block": "10.0.1.0/24"}),
                json!({"id": "subnet-1"}),
                &["aws_vpc.main"],
            ),
        );
        assert!(plan(vec![vpc(), subnet()], &snapshot).is_empty());
    }

    #[test]
    fn test_mutable_change_is_update() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-1"}), &[]),
        );
        let changed = Resource::new("aws_vpc", "main").attr("cidr_block", "10.1.0.0/16");
        let set = plan(vec![changed], &snapshot);
        assert_eq!(set.entries[0].action, ChangeAction::Update);
        assert_eq!(set.entries[0].diff[0].before, Some(json!("10.0.0.0/16")));
    }

    #[test]
    fn test_replace_trigger_cascades_to_consumer() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-1"}), &[]),
        );
        snapshot.insert(
            id("aws_subnet.a"),
            record(
                json!({"vpc_id": "vpc-1", "cidr_block": "10.0.1.0/24"}),
                json!({"id": "subnet-1"}),
                &["aws_vpc.main"],
            ),
        );
        let lifecycle = Lifecycle {
            replace_on: vec!["cidr_block".into()],
            ..Default::default()
        };
        let vpc = Resource::new("aws_vpc", "main")
            .attr("cidr_block", "10.9.0.0/16")
            .with_lifecycle(lifecycle);
        let subnet = subnet().with_lifecycle(Lifecycle {
            replace_on: vec!["vpc_id".into()],
            ..Default::default()
        });

        let set = plan(vec![vpc, subnet], &snapshot);
        // the old subnet goes before the old VPC, the new one after the new VPC
        assert_eq!(
            actions(&set),
            vec![
                ("aws_subnet.a".to_string(), ChangeAction::Destroy),
                ("aws_vpc.main".to_string(), ChangeAction::Replace),
                ("aws_subnet.a".to_string(), ChangeAction::Replace),
            ]
        );
        assert!(set.entries[0].replacing);
        assert_eq!(set.entries[1].depends_on, vec![0]);
        assert_eq!(set.entries[2].depends_on, vec![0, 1]);
        assert_eq!(set.entries[1].replace_reasons(), vec!["cidr_block"]);
        assert_eq!(set.get(&id("aws_subnet.a")).unwrap().action, ChangeAction::Replace);

        let summary = set.summary();
        assert_eq!((summary.replace, summary.destroy), (2, 0));
    }

    #[test]
    fn test_orphan_destroyed_before_replaced_producer() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-1"}), &[]),
        );
        snapshot.insert(
            id("aws_subnet.old"),
            record(json!({"vpc_id": "vpc-1"}), json!({"id": "subnet-1"}), &["aws_vpc.main"]),
        );
        let vpc = Resource::new("aws_vpc", "main")
            .attr("cidr_block", "10.9.0.0/16")
            .with_lifecycle(Lifecycle {
                replace_on: vec!["cidr_block".into()],
                ..Default::default()
            });

        let set = plan(vec![vpc], &snapshot);
        assert_eq!(
            actions(&set),
            vec![
                ("aws_subnet.old".to_string(), ChangeAction::Destroy),
                ("aws_vpc.main".to_string(), ChangeAction::Replace),
            ]
        );
        assert!(!set.entries[0].replacing);
        assert_eq!(set.entries[1].depends_on, vec![0]);
    }

    #[test]
    fn test_deposed_instance_is_destroyed() {
        let mut snapshot = Snapshot::new();
        let mut vpc_record = record(
            json!({"cidr_block": "10.0.0.0/16"}),
            json!({"id": "vpc-2", "cidr_block": "10.0.0.0/16"}),
            &[],
        );
        vpc_record.deposed = Some("vpc-1".into());
        snapshot.insert(id("aws_vpc.main"), vpc_record);

        let set = plan(vec![vpc()], &snapshot);
        assert_eq!(set.len(), 1);
        assert_eq!(set.entries[0].action, ChangeAction::Destroy);
        assert_eq!(set.entries[0].deposed.as_deref(), Some("vpc-1"));
        assert!(set.get(&id("aws_vpc.main")).is_none());
        assert_eq!(set.summary().destroy, 1);
    }

    #[test]
    fn test_deposed_cleanup_precedes_update() {
        let mut snapshot = Snapshot::new();
        let mut vpc_record = record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-2"}), &[]);
        vpc_record.deposed = Some("vpc-1".into());
        snapshot.insert(id("aws_vpc.main"), vpc_record);

        let changed = Resource::new("aws_vpc", "main").attr("cidr_block", "10.1.0.0/16");
        let set = plan(vec![changed], &snapshot);
        assert_eq!(set.entries[0].deposed.as_deref(), Some("vpc-1"));
        assert_eq!(set.entries[1].action, ChangeAction::Update);
        assert_eq!(set.entries[1].depends_on, vec![0]);
    }

    #[test]
    fn test_update_propagates_declared_value() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(
                json!({"name": "old"}),
                json!({"id": "vpc-1", "name": "old"}),
                &[],
            ),
        );
        snapshot.insert(
            id("aws_subnet.a"),
            record(
                json!({"vpc_id": "vpc-1", "label": "old"}),
                json!({"id": "subnet-1"}),
                &["aws_vpc.main"],
            ),
        );
        let vpc = Resource::new("aws_vpc", "main").attr("name", "new");
        let subnet = Resource::new("aws_subnet", "a")
            .attr("vpc_id", Expr::reference(id("aws_vpc.main"), "id"))
            .attr("label", Expr::reference(id("aws_vpc.main"), "name"));

        let set = plan(vec![vpc, subnet], &snapshot);
        let subnet_entry = set.get(&id("aws_subnet.a")).unwrap();
        assert_eq!(subnet_entry.action, ChangeAction::Update);
        assert_eq!(subnet_entry.diff.len(), 1);
        assert_eq!(subnet_entry.diff[0].after, Some(Planned::Known(json!("new"))));
    }

    #[test]
    fn test_missing_output_of_unchanged_producer() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-1"}), &[]),
        );
        let consumer = Resource::new("aws_subnet", "a")
            .attr("arn", Expr::reference(id("aws_vpc.main"), "arn"));
        let graph = Graph::build(vec![vpc(), consumer]).unwrap();
        let result = Planner::new(&graph, &snapshot).plan();
        assert!(matches!(result, Err(Error::MissingOutput { .. })));
    }

    #[test]
    fn test_orphans_destroyed_dependents_first() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_eks_cluster.main"),
            record(json!({}), json!({"id": "eks-1"}), &["aws_subnet.a"]),
        );
        snapshot.insert(
            id("aws_subnet.a"),
            record(json!({}), json!({"id": "subnet-1"}), &["aws_vpc.main"]),
        );
        snapshot.insert(id("aws_vpc.main"), record(json!({}), json!({"id": "vpc-1"}), &[]));

        let set = plan(vec![], &snapshot);
        let order: Vec<_> = set.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(
            order,
            vec!["aws_eks_cluster.main", "aws_subnet.a", "aws_vpc.main"]
        );
        assert!(set.iter().all(|e| e.action == ChangeAction::Destroy));
    }

    #[test]
    fn test_prevent_destroy_blocks_replace() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("aws_vpc.main"),
            record(json!({"cidr_block": "10.0.0.0/16"}), json!({"id": "vpc-1"}), &[]),
        );
        let vpc = Resource::new("aws_vpc", "main")
            .attr("cidr_block", "10.9.0.0/16")
            .with_lifecycle(Lifecycle {
                replace_on: vec!["cidr_block".into()],
                prevent_destroy: true,
                ..Default::default()
            });
        let graph = Graph::build(vec![vpc]).unwrap();
        assert!(matches!(
            Planner::new(&graph, &snapshot).plan(),
            Err(Error::PreventDestroy { .. })
        ));
        assert!(matches!(
            plan_destroy(&snapshot, Some(&graph)),
            Err(Error::PreventDestroy { .. })
        ));
    }

    #[test]
    fn test_plan_destroy_reverse_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            id("a.producer"),
            record(json!({}), json!({"id": "1"}), &[]),
        );
        snapshot.insert(
            id("b.consumer"),
            record(json!({}), json!({"id": "2"}), &["a.producer"]),
        );
        let set = plan_destroy(&snapshot, None).unwrap();
        let order: Vec<_> = set.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(order, vec!["b.consumer", "a.producer"]);
        assert_eq!(set.entries[1].depends_on, vec![0]);
    }

    #[test]
    fn test_filter_by_target_keeps_dependencies() {
        let extra = Resource::new("aws_instance", "bastion");
        let set = plan(vec![vpc(), subnet(), extra], &Snapshot::new());
        let filtered = set.filter_by_target(&[Target::parse("aws_subnet.a")]);
        let ids: Vec<_> = filtered.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["aws_vpc.main", "aws_subnet.a"]);
        assert_eq!(filtered.entries[1].depends_on, vec![0]);

        assert_eq!(Target::parse("aws_vpc"), Target::Type("aws_vpc".into()));
    }

    #[test]
    fn test_summary_counts() {
        let set = plan(vec![vpc(), subnet()], &Snapshot::new());
        let summary = set.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.total(), 2);
    }
}
