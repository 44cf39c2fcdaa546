//! Keep the inbox and unread badge on screen until Ctrl-C.
//!
//! Live events only cross process boundaries through the shared database,
//! so the views are re-pulled every poll interval.

use anyhow::Result;
use dmsync_types::ConversationSummary;
use std::time::Duration;
use tracing::warn;

use super::{inbox, print_json, Account};

/// Run the watch command.
///
/// Stops on Ctrl-C, or after `polls` refreshes when given.
pub async fn run(account: &Account, interval: Duration, polls: Option<u64>, json: bool) -> Result<()> {
    let me = account.user_id();
    let client = account.client()?;
    let inbox_view = client.open_inbox(me).await?;
    let badge_view = client.unread_badge(me).await?;

    let mut shown: Option<(Vec<ConversationSummary>, u64)> = None;
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut done = 0u64;

    loop {
        let current = (inbox_view.current(), badge_view.current());
        if shown.as_ref() != Some(&current) {
            if json {
                print_json(&serde_json::json!({
                    "unread": current.1,
                    "inbox": current.0,
                }))?;
            } else {
                println!("--- inbox ({} unread) ---", current.1);
                print!("{}", inbox::render(&current.0, me));
            }
            shown = Some(current);
        }

        if polls.is_some_and(|limit| done >= limit) {
            break;
        }
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = client.refresh().await {
                    warn!(error = %e, "refresh failed, keeping last view");
                }
                done += 1;
            }
        }
    }

    client.close_badge().await;
    client.close_inbox().await;
    Ok(())
}
