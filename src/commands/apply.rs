//! `terrace apply` - make the real world match the declarations

use super::{load_graph, open_store, report_previous_failures, targets};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{DialoguerConfirm, TerminalProgress, display_change_set, display_report};
use crate::provider;
use crate::signal;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    Applier, AutoConfirm, ChangeSet, ConfirmCallback, ExecuteOptions, Planner, Provider,
    StateLock, StateStore,
};

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<i32> {
    let graph = load_graph(ctx)?;
    let provider = provider::from_settings(&ctx.settings)?;
    let store = open_store(ctx)?;
    // held from planning until the last commit
    let lock = store.lock().context("Could not lock state")?;

    let snapshot = store.snapshot()?;
    let changes = Planner::new(&graph, &snapshot)
        .with_provider(provider.as_ref())
        .plan()?
        .filter_by_target(&targets(&args.target));

    report_previous_failures(ctx, &store)?;
    let opts = ctx
        .settings
        .execute_options(args.jobs, args.continue_on_error);
    let mut confirm: Box<dyn ConfirmCallback> = if args.auto_approve {
        Box::new(AutoConfirm)
    } else {
        Box::new(DialoguerConfirm)
    };

    execute(ctx, &changes, provider.as_ref(), &store, &lock, opts, confirm.as_mut())
}

/// Show, confirm and apply a change set; shared with `destroy`
pub fn execute(
    ctx: &Context,
    changes: &ChangeSet,
    provider: &dyn Provider,
    store: &dyn StateStore,
    lock: &StateLock,
    opts: ExecuteOptions,
    confirm: &mut dyn ConfirmCallback,
) -> Result<i32> {
    display_change_set(changes);
    if changes.is_empty() {
        return Ok(0);
    }

    println!();
    if !confirm.confirm("Apply these changes?")? {
        ui::warn("Aborted, nothing was changed");
        return Ok(1);
    }

    let cancel = signal::install();
    let mut progress = TerminalProgress::new(ctx.quiet);
    let report = Applier::new(provider, store)
        .with_options(opts)
        .with_cancel(cancel)
        .apply(changes, &mut progress, lock)?;

    display_report(&report, ctx.verbose > 0);
    Ok(if report.is_success() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{NETWORK, context};
    use declarative::{AutoDecline, Attributes, ProviderError, ProviderOutput, ResourceId};
    use tempfile::TempDir;

    /// Rejects every create
    struct Rejecting;

    impl Provider for Rejecting {
        fn create(
            &self,
            _resource: &ResourceId,
            _attributes: &Attributes,
        ) -> declarative::ProviderResult<ProviderOutput> {
            Err(ProviderError::permanent("quota exceeded"))
        }

        fn update(
            &self,
            _resource: &ResourceId,
            _id: &str,
            _previous: &Attributes,
            _attributes: &Attributes,
        ) -> declarative::ProviderResult<ProviderOutput> {
            Err(ProviderError::permanent("quota exceeded"))
        }

        fn destroy(&self, _resource: &ResourceId, _id: &str) -> declarative::ProviderResult<()> {
            Ok(())
        }
    }

    fn plan_network(ctx: &Context, store: &dyn StateStore) -> ChangeSet {
        let graph = load_graph(ctx).unwrap();
        let snapshot = store.snapshot().unwrap();
        Planner::new(&graph, &snapshot).plan().unwrap()
    }

    #[test]
    fn test_declined_prompt_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, NETWORK);
        let provider = provider::from_settings(&ctx.settings).unwrap();
        let store = open_store(&ctx).unwrap();
        let lock = store.lock().unwrap();
        let changes = plan_network(&ctx, &store);

        let code = execute(
            &ctx,
            &changes,
            provider.as_ref(),
            &store,
            &lock,
            ExecuteOptions::default(),
            &mut AutoDecline,
        )
        .unwrap();
        assert_eq!(code, 1);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_failed_apply_exits_one() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, NETWORK);
        let store = open_store(&ctx).unwrap();
        let lock = store.lock().unwrap();
        let changes = plan_network(&ctx, &store);

        let code = execute(
            &ctx,
            &changes,
            &Rejecting,
            &store,
            &lock,
            ExecuteOptions::default(),
            &mut AutoConfirm,
        )
        .unwrap();
        assert_eq!(code, 1);
        let vpc = ResourceId::new("aws_vpc", "main");
        assert!(store.failures().unwrap()[&vpc].error.contains("quota exceeded"));
    }

    #[test]
    fn test_successful_apply_exits_zero() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, NETWORK);
        let args = || ApplyArgs {
            auto_approve: true,
            jobs: Some(2),
            continue_on_error: false,
            target: Vec::new(),
        };
        assert_eq!(run(&ctx, args()).unwrap(), 0);
        assert_eq!(open_store(&ctx).unwrap().snapshot().unwrap().len(), 2);
        // nothing left to do
        assert_eq!(run(&ctx, args()).unwrap(), 0);
    }
}
