//! `thinscan resolve` command

use anyhow::{Context as _, Result};
use colored::Colorize;
use thinscan_core::IdentifierResolver;

use super::Context;

pub async fn resolve(ctx: &Context, target: &str, json: bool) -> Result<()> {
    let resolver = IdentifierResolver::new(ctx.runtime.clone());
    let resolved = resolver
        .resolve(target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        println!("{} {} {}", target.bold(), resolved.kind.to_string().cyan(), resolved.canonical_id);
    }
    Ok(())
}
