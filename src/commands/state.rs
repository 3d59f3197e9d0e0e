//! `terrace state` - inspect or repair the state file

use super::open_store;
use crate::Context;
use crate::cli::StateCommand;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{FileStore, ResourceId, StateStore};

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<i32> {
    match cmd {
        StateCommand::List => list(ctx),
        StateCommand::Show { id } => show(ctx, &parse_id(&id)?),
        StateCommand::Rm { id } => rm(ctx, &parse_id(&id)?),
        StateCommand::Unlock => unlock(ctx),
    }
}

fn parse_id(raw: &str) -> Result<ResourceId> {
    raw.parse::<ResourceId>().map_err(anyhow::Error::msg)
}

fn list(ctx: &Context) -> Result<i32> {
    let store = open_store(ctx)?;
    let snapshot = store.snapshot()?;
    let failures = store.failures()?;

    if snapshot.is_empty() {
        ui::info("State is empty");
        return Ok(0);
    }
    for (id, record) in &snapshot {
        let marker = if failures.contains_key(id) {
            " (failed last run)".red().to_string()
        } else {
            String::new()
        };
        println!("{:<40} {}{}", id.to_string(), record.id.dimmed(), marker);
    }
    for id in failures.keys().filter(|id| !snapshot.contains_key(*id)) {
        println!("{:<40} {}", id.to_string(), "(never created, failed last run)".red());
    }
    Ok(0)
}

fn show(ctx: &Context, id: &ResourceId) -> Result<i32> {
    let store = open_store(ctx)?;
    let Some(record) = store.get(id)? else {
        anyhow::bail!("{id} is not in state");
    };

    ui::header(&id.to_string());
    ui::kv("id", &record.id);
    ui::kv("updated", &ui::timestamp(&record.updated_at));
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }
    if let Some(deposed) = &record.deposed {
        ui::kv("deposed", deposed);
    }
    if let Some(failure) = store.failures()?.get(id) {
        ui::kv("last error", &failure.error);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&record.outputs)?);
    Ok(0)
}

fn rm(ctx: &Context, id: &ResourceId) -> Result<i32> {
    let store = open_store(ctx)?;
    let _lock = store.lock().context("Could not lock state")?;
    if store.get(id)?.is_none() {
        anyhow::bail!("{id} is not in state");
    }
    store.delete(id)?;
    ui::success(&format!("Removed {id} from state (the real resource was not touched)"));
    Ok(0)
}

fn unlock(ctx: &Context) -> Result<i32> {
    let path = ctx.state_path();
    if FileStore::force_unlock(&path)? {
        ui::success(&format!("Removed lock {}", FileStore::lock_path(&path).display()));
    } else {
        ui::info("State is not locked");
    }
    Ok(0)
}
