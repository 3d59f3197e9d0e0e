//! `terrace plan` - dry run that prints the change set

use super::{load_graph, open_store, report_previous_failures, targets};
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::display_change_set;
use crate::provider;
use anyhow::Result;
use declarative::{Planner, StateStore, plan_destroy};

/// Exit code when the plan contains changes
pub const EXIT_CHANGES: i32 = 2;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<i32> {
    let graph = load_graph(ctx)?;
    let provider = provider::from_settings(&ctx.settings)?;
    let store = open_store(ctx)?;
    let snapshot = store.snapshot()?;

    let changes = if args.destroy {
        plan_destroy(&snapshot, Some(&graph))?
    } else {
        Planner::new(&graph, &snapshot)
            .with_provider(provider.as_ref())
            .plan()?
    };
    let changes = changes.filter_by_target(&targets(&args.target));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else {
        report_previous_failures(ctx, &store)?;
        display_change_set(&changes);
    }

    Ok(if changes.is_empty() { 0 } else { EXIT_CHANGES })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ApplyArgs;
    use crate::commands::apply;
    use crate::commands::testing::{NETWORK, context};
    use tempfile::TempDir;

    fn args() -> PlanArgs {
        PlanArgs {
            json: true,
            destroy: false,
            target: Vec::new(),
        }
    }

    #[test]
    fn test_exit_code_reports_pending_changes() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, NETWORK);
        assert_eq!(run(&ctx, args()).unwrap(), EXIT_CHANGES);
        // planning never writes state
        assert!(!ctx.state_path().exists());
    }

    #[test]
    fn test_exit_code_zero_once_applied() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, NETWORK);
        let apply_args = ApplyArgs {
            auto_approve: true,
            jobs: Some(1),
            continue_on_error: false,
            target: Vec::new(),
        };
        assert_eq!(apply::run(&ctx, apply_args).unwrap(), 0);
        assert_eq!(run(&ctx, args()).unwrap(), 0);

        let destroy = PlanArgs {
            destroy: true,
            ..args()
        };
        assert_eq!(run(&ctx, destroy).unwrap(), EXIT_CHANGES);
    }
}
