mod watch;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::context::ClientContext;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let ctx = ClientContext::from_cli(&cli)?;
	info!(target = "netscope", server = %ctx.config.server_url, delivery = ?ctx.config.delivery, "client ready");

	let result = run(cli.command, &ctx).await;
	ctx.finish().await;
	result
}

async fn run(command: Commands, ctx: &ClientContext) -> Result<()> {
	match command {
		Commands::Discover { daemon_id, watch } => {
			let session = ctx
				.tracker
				.initiate_discovery(&daemon_id)
				.await
				.with_context(|| format!("failed to start discovery on {daemon_id}"))?;
			println!("{}", serde_json::to_string_pretty(&session)?);
			if watch {
				watch::follow(ctx).await?;
			}
		}
		Commands::Cancel { session_id } => {
			ctx.tracker
				.cancel_discovery(&session_id)
				.await
				.with_context(|| format!("failed to cancel {session_id}"))?;
			println!("cancel requested for {session_id}");
		}
		Commands::Active => {
			ctx.tracker.resume().await.context("failed to list active sessions")?;
			ctx.tracker.stop_updates();
			println!("{}", serde_json::to_string_pretty(&ctx.tracker.sessions())?);
		}
		Commands::Watch => {
			let active = ctx.tracker.resume().await.context("failed to list active sessions")?;
			if active == 0 {
				println!("no active discovery sessions");
				return Ok(());
			}
			watch::follow(ctx).await?;
		}
	}

	Ok(())
}
