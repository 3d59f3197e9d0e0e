//! Execution engine - applies a change set with DAG-aware parallelism
//!
//! The calling thread coordinates: it hands ready entries to a rayon pool
//! and collects their results over a channel. An entry becomes ready once
//! every entry it waits for has committed its state record.

use crate::context::{CancelToken, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::{ChangeAction, ChangeEntry, ChangeSet};
use crate::provider::{Provider, ProviderOutput};
use crate::retry::{LogCallback, with_retry};
use crate::state::{StateLock, StateRecord, StateStore};
use crate::types::{
    ApplyResult, Attributes, ExecuteOptions, ExecuteSummary, FailurePolicy, Planned, Reference,
    ResourceId, RetryConfig,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;

/// Per-entry outcomes of an apply run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Outcomes in change set order
    pub outcomes: Vec<(ResourceId, ApplyResult)>,
    pub summary: ExecuteSummary,
    /// Whether the run stopped because of a cancel request
    pub cancelled: bool,
}

impl ApplyReport {
    /// Check if every entry was applied
    pub fn is_success(&self) -> bool {
        self.summary.is_success() && !self.cancelled
    }

    /// Failed entries with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&ResourceId, &str)> {
        self.outcomes.iter().filter_map(|(id, result)| match result {
            ApplyResult::Failed { error } => Some((id, error.as_str())),
            _ => None,
        })
    }

    /// Final outcome for one identity
    pub fn outcome(&self, id: &ResourceId) -> Option<&ApplyResult> {
        self.outcomes.iter().rev().find(|(i, _)| i == id).map(|(_, r)| r)
    }
}

/// Applies change sets through a provider, committing to a state store
pub struct Applier<'a> {
    provider: &'a dyn Provider,
    store: &'a dyn StateStore,
    opts: ExecuteOptions,
    cancel: CancelToken,
}

impl<'a> Applier<'a> {
    pub fn new(provider: &'a dyn Provider, store: &'a dyn StateStore) -> Self {
        Self {
            provider,
            store,
            opts: ExecuteOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, opts: ExecuteOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute a change set.
    ///
    /// The caller must hold the store's lock for the whole plan/apply cycle;
    /// `_lock` is the evidence.
    pub fn apply<P: ProgressCallback>(
        &self,
        changes: &ChangeSet,
        progress: &mut P,
        _lock: &StateLock,
    ) -> Result<ApplyReport> {
        let n = changes.len();
        if n == 0 {
            return Ok(ApplyReport::default());
        }

        let jobs = self.opts.jobs.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, entry) in changes.iter().enumerate() {
            for &d in &entry.depends_on {
                dependents[d].push(i);
            }
        }
        let mut remaining: Vec<usize> = changes.iter().map(|e| e.depends_on.len()).collect();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut results: Vec<Option<ApplyResult>> = vec![None; n];
        let mut blocked: Vec<Option<String>> = vec![None; n];
        let mut halted_by: Option<ResourceId> = None;
        let mut running = 0usize;

        progress.on_batch_start(n);
        let (tx, rx) = mpsc::channel::<(usize, ApplyResult)>();

        pool.in_place_scope(|scope| {
            loop {
                if halted_by.is_none() && !self.cancel.is_cancelled() {
                    while running < jobs
                        && let Some(i) = ready.pop_first()
                    {
                        let entry = &changes.entries[i];
                        progress.on_resource_start(&entry.id, entry.action);
                        running += 1;

                        let tx = tx.clone();
                        let (provider, store, retry) = (self.provider, self.store, &self.opts.retry);
                        scope.spawn(move |_| {
                            let result = catch_unwind(AssertUnwindSafe(|| {
                                apply_entry(entry, provider, store, retry)
                            }))
                            .unwrap_or_else(|_| ApplyResult::Failed {
                                error: "provider panicked".to_string(),
                            });
                            // receiver outlives the scope
                            let _ = tx.send((i, result));
                        });
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok((i, result)) = rx.recv() else {
                    break;
                };
                running -= 1;
                let id = &changes.entries[i].id;
                progress.on_resource_complete(id, &result);

                if result.is_success() {
                    for &d in &dependents[i] {
                        remaining[d] -= 1;
                        if remaining[d] == 0 && blocked[d].is_none() {
                            ready.insert(d);
                        }
                    }
                } else {
                    block_dependents(i, id, &dependents, &mut blocked);
                    if self.opts.failure_policy == FailurePolicy::Halt && halted_by.is_none() {
                        log::warn!("Halting run after failure of {}", id);
                        halted_by = Some(id.clone());
                    }
                }
                results[i] = Some(result);
            }
        });

        let cancelled = self.cancel.is_cancelled();
        let mut report = ApplyReport {
            cancelled,
            ..Default::default()
        };
        for (i, result) in results.into_iter().enumerate() {
            let id = &changes.entries[i].id;
            let result = result.unwrap_or_else(|| {
                let reason = blocked[i].take().unwrap_or_else(|| match &halted_by {
                    Some(failed) => format!("run halted after {failed} failed"),
                    None if cancelled => "run cancelled".to_string(),
                    None => "not started".to_string(),
                });
                let skipped = ApplyResult::Skipped { reason };
                progress.on_resource_complete(id, &skipped);
                skipped
            });
            // a split-out destroy half is counted with its replacement
            if !changes.entries[i].replacing || matches!(result, ApplyResult::Failed { .. }) {
                report.summary.add_result(&result);
            }
            report.outcomes.push((id.clone(), result));
        }
        progress.on_batch_complete();

        log::info!(
            "Apply finished: {} changed, {} failed, {} skipped",
            report.summary.total_changes(),
            report.summary.failed,
            report.summary.skipped
        );
        Ok(report)
    }
}

/// Mark every transitive dependent of a failed entry as blocked
fn block_dependents(
    failed: usize,
    id: &ResourceId,
    dependents: &[Vec<usize>],
    blocked: &mut [Option<String>],
) {
    let mut pending: Vec<usize> = dependents[failed].clone();
    while let Some(d) = pending.pop() {
        if blocked[d].is_none() {
            blocked[d] = Some(format!("dependency {id} failed"));
            pending.extend(&dependents[d]);
        }
    }
}

/// Apply a single entry, recording any failure in the store
fn apply_entry(
    entry: &ChangeEntry,
    provider: &dyn Provider,
    store: &dyn StateStore,
    retry: &RetryConfig,
) -> ApplyResult {
    log::debug!("Applying {} {}", entry.action, entry.id);
    match run_entry(entry, provider, store, retry) {
        Ok(result) => result,
        Err(e) => {
            log::error!("{} {} failed: {}", entry.action, entry.id, e);
            let error = e.to_string();
            if let Err(persist) = store.record_failure(&entry.id, &error) {
                log::warn!("Could not persist failure of {}: {}", entry.id, persist);
            }
            ApplyResult::Failed { error }
        }
    }
}

fn run_entry(
    entry: &ChangeEntry,
    provider: &dyn Provider,
    store: &dyn StateStore,
    retry: &RetryConfig,
) -> Result<ApplyResult> {
    let id = &entry.id;
    match entry.action {
        ChangeAction::Create => {
            let attributes = resolve_attributes(entry, store)?;
            let output = call(id, retry, || provider.create(id, &attributes))?;
            commit(store, entry, attributes, output, None)?;
            Ok(ApplyResult::Created)
        }
        ChangeAction::Update => {
            let record = existing_record(store, id)?;
            let attributes = resolve_attributes(entry, store)?;
            let output = call(id, retry, || {
                provider.update(id, &record.id, &record.attributes, &attributes)
            })?;
            commit(store, entry, attributes, output, None)?;
            Ok(ApplyResult::Modified)
        }
        ChangeAction::Destroy => {
            let Some(record) = store.get(id)? else {
                log::debug!("{} already absent from state", id);
                store.delete(id)?;
                return Ok(ApplyResult::Removed);
            };
            let record = destroy_deposed(id, record, provider, store, retry)?;
            // a deposed cleanup keeps the current instance
            if entry.deposed.is_none() {
                call(id, retry, || provider.destroy(id, &record.id))?;
                store.delete(id)?;
            }
            Ok(ApplyResult::Removed)
        }
        ChangeAction::Replace if entry.create_before_destroy => {
            let old = destroy_deposed(id, existing_record(store, id)?, provider, store, retry)?;
            let attributes = resolve_attributes(entry, store)?;
            let output = call(id, retry, || provider.create(id, &attributes))?;
            // the old id stays recorded until its destroy succeeds
            let mut record = commit(store, entry, attributes, output, Some(old.id.clone()))?;
            call(id, retry, || provider.destroy(id, &old.id))?;
            record.deposed = None;
            store.put(id, record)?;
            Ok(ApplyResult::Replaced)
        }
        ChangeAction::Replace => {
            match store.get(id)? {
                Some(old) => {
                    let old = destroy_deposed(id, old, provider, store, retry)?;
                    call(id, retry, || provider.destroy(id, &old.id))?;
                    store.delete(id)?;
                }
                None => log::debug!("Old instance of {} already destroyed", id),
            }
            let attributes = resolve_attributes(entry, store)?;
            let output = call(id, retry, || provider.create(id, &attributes))?;
            commit(store, entry, attributes, output, None)?;
            Ok(ApplyResult::Replaced)
        }
    }
}

/// Destroy a deposed instance, if any, and drop it from the record
fn destroy_deposed(
    id: &ResourceId,
    record: StateRecord,
    provider: &dyn Provider,
    store: &dyn StateStore,
    retry: &RetryConfig,
) -> Result<StateRecord> {
    let Some(instance) = &record.deposed else {
        return Ok(record);
    };
    log::debug!("Destroying deposed instance {} of {}", instance, id);
    call(id, retry, || provider.destroy(id, instance))?;
    let record = StateRecord {
        deposed: None,
        ..record
    };
    store.put(id, record.clone())?;
    Ok(record)
}

fn call<T>(
    id: &ResourceId,
    retry: &RetryConfig,
    op: impl FnMut() -> std::result::Result<T, crate::error::ProviderError>,
) -> Result<T> {
    with_retry(retry, Some(&LogCallback), op).map_err(|source| Error::Provider {
        identity: id.clone(),
        source,
    })
}

fn existing_record(store: &dyn StateStore, id: &ResourceId) -> Result<StateRecord> {
    store
        .get(id)?
        .ok_or_else(|| Error::Other(format!("{id} has no state record to change")))
}

/// Resolve declared expressions against committed producer records
fn resolve_attributes(entry: &ChangeEntry, store: &dyn StateStore) -> Result<Attributes> {
    let mut lookup = |reference: &Reference| -> Result<Planned> {
        let missing = || Error::MissingOutput {
            consumer: entry.id.clone(),
            reference: reference.clone(),
        };
        let record = store.get(&reference.target)?.ok_or_else(missing)?;
        reference
            .lookup(&record.outputs)
            .map(|v| Planned::Known(v.clone()))
            .ok_or_else(missing)
    };

    let mut attributes = Attributes::new();
    for (name, expr) in &entry.expressions {
        match expr.resolve(&mut lookup)? {
            Planned::Known(value) => {
                attributes.insert(name.clone(), value);
            }
            Planned::Unknown => {
                return Err(Error::Other(format!(
                    "{}: attribute {name} is still unknown at apply time",
                    entry.id
                )));
            }
        }
    }
    Ok(attributes)
}

/// Write the record for a successfully applied entry.
///
/// Outputs are the applied attributes overlaid with what the provider
/// returned, plus `id`.
fn commit(
    store: &dyn StateStore,
    entry: &ChangeEntry,
    attributes: Attributes,
    output: ProviderOutput,
    deposed: Option<String>,
) -> Result<StateRecord> {
    let mut outputs = attributes.clone();
    outputs.extend(output.outputs);
    outputs
        .entry("id".to_string())
        .or_insert_with(|| serde_json::Value::String(output.id.clone()));

    let mut record = StateRecord::new(output.id, attributes, outputs);
    record.dependencies = entry.dependencies.clone();
    record.deposed = deposed;
    store.put(&entry.id, record.clone())?;
    log::debug!("Committed state for {}", entry.id);
    Ok(record)
}

/// Simple execution without callbacks
///
/// Takes the store lock itself; for basic use cases where you don't need
/// progress or cancellation.
pub fn execute_simple(
    changes: &ChangeSet,
    provider: &dyn Provider,
    store: &dyn StateStore,
    opts: ExecuteOptions,
) -> Result<ApplyReport> {
    let lock = store.lock()?;
    Applier::new(provider, store)
        .with_options(opts)
        .apply(changes, &mut NoProgress, &lock)
}
