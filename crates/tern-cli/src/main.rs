mod bootstrap_helpers;
mod cli_args;
mod transcript_replay;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tern_activity::ApprovalGateway;
use tern_gateway::RequestGateway;
use tracing::info;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, TernCommand};
use crate::transcript_replay::{read_transcript, replay_transcript};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        None | Some(TernCommand::Serve) => serve(&cli).await,
        Some(TernCommand::Replay {
            transcript,
            session_id,
            issue,
        }) => {
            let raw = read_transcript(transcript)?;
            let report = replay_transcript(&raw, session_id, issue, cli.advancer_config()).await?;
            if report.counts.completed == 0 {
                info!("transcript ended without a result message");
            }
            println!("{}", report.snapshot_json);
            Ok(())
        }
    }
}

async fn serve(cli: &Cli) -> Result<()> {
    let approvals = Arc::new(ApprovalGateway::default());
    let gateway = RequestGateway::new(cli.gateway_config()).with_approvals(approvals);
    let addr = gateway
        .start()
        .await
        .context("failed to start request gateway")?;
    info!(
        %addr,
        public_url = %gateway.public_base_url(),
        webhook_handlers = gateway.raw_handler_count() + gateway.signed_handler_count(),
        "tern request gateway ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    gateway
        .stop()
        .await
        .context("failed to stop request gateway")?;
    Ok(())
}
