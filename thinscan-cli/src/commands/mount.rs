//! `thinscan mount` and `thinscan unmount` commands
//!
//! Both hold SIGINT/SIGTERM until the lifecycle step in flight has finished,
//! so an interrupt never leaves a half-built device behind. An interrupted
//! mount is torn down again before the command exits.

use std::path::Path;

use anyhow::{Context as _, Result};
use colored::Colorize;
use thinscan_core::{CancelHandle, IdentifierResolver, ThinMountManager};

use super::Context;
use crate::shutdown;

fn manager(ctx: &Context) -> ThinMountManager {
    ThinMountManager::new(ctx.runtime.clone(), ctx.tools.clone(), ctx.config.clone())
}

/// Mount `target` read-only and leave it mounted.
pub async fn mount(ctx: &Context, target: &str, json: bool) -> Result<()> {
    let cancel = CancelHandle::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());
    let result = mount_shielded(ctx, target, json, &cancel).await;
    signals.abort();
    result
}

async fn mount_shielded(
    ctx: &Context,
    target: &str,
    json: bool,
    cancel: &CancelHandle,
) -> Result<()> {
    let resolver = IdentifierResolver::new(ctx.runtime.clone());
    let resolved = resolver
        .resolve(target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?;

    let handle = manager(ctx)
        .mount_unless_cancelled(&resolved, cancel)
        .await
        .with_context(|| format!("Failed to mount {}", target))?;
    let Some(handle) = handle else {
        anyhow::bail!("Mount of {} cancelled", target);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&handle)?);
        return Ok(());
    }

    println!("{} {} mounted at {}", "✓".green(), target.bold(), handle.mount_path.display());
    println!("  Device:    {}", handle.device_path.display());
    println!("  Container: {}", handle.container_id);
    println!();
    println!("Remove it with: thinscan unmount {}", handle.mount_path.display());
    Ok(())
}

/// Tear down a mount knowing only its path.
pub async fn unmount(ctx: &Context, path: &Path) -> Result<()> {
    let signals = shutdown::cancel_on_signal(CancelHandle::new());
    let resolver = IdentifierResolver::new(ctx.runtime.clone());
    let result = manager(ctx)
        .unmount_standalone(&resolver, path)
        .await
        .with_context(|| format!("Failed to unmount {}", path.display()));
    signals.abort();
    result?;

    println!("{} Removed {}", "✓".green(), path.display());
    Ok(())
}
