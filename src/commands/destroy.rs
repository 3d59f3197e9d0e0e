//! `terrace destroy` - tear down everything recorded in state

use super::{load_graph, open_store};
use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::DialoguerConfirm;
use crate::provider;
use crate::schema;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{AutoConfirm, ConfirmCallback, StateStore, plan_destroy};
use std::path::Path;

pub fn run(ctx: &Context, args: DestroyArgs) -> Result<i32> {
    // declarations are optional here; they only add prevent_destroy checks
    let graph = if ctx.files.is_empty() && !Path::new(schema::DEFAULT_FILE).exists() {
        log::debug!("No declarations found, destroying from state alone");
        None
    } else {
        Some(load_graph(ctx)?)
    };

    let provider = provider::from_settings(&ctx.settings)?;
    let store = open_store(ctx)?;
    let lock = store.lock().context("Could not lock state")?;
    let changes = plan_destroy(&store.snapshot()?, graph.as_ref())?;

    let opts = ctx.settings.execute_options(args.jobs, false);
    let mut confirm: Box<dyn ConfirmCallback> = if args.auto_approve {
        Box::new(AutoConfirm)
    } else {
        Box::new(DialoguerConfirm)
    };

    super::apply::execute(ctx, &changes, provider.as_ref(), &store, &lock, opts, confirm.as_mut())
}
