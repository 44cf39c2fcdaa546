//! Print the inbox: one row per peer, most recent first.

use anyhow::Result;
use dmsync_types::{ConversationSummary, UserId};

use super::{format_timestamp, preview, print_json, Account};

/// Run the inbox command.
pub async fn run(account: &Account, json: bool) -> Result<()> {
    let client = account.client()?;
    let view = client.open_inbox(account.user_id()).await?;
    let rows = view.current();
    client.close_inbox().await;

    if json {
        return print_json(&rows);
    }
    print!("{}", render(&rows, account.user_id()));
    Ok(())
}

/// Render inbox rows, one per line.
pub fn render(rows: &[ConversationSummary], me: UserId) -> String {
    if rows.is_empty() {
        return "No conversations yet.\n".to_string();
    }
    let mut out = String::new();
    for row in rows {
        let name = row
            .peer_display_name
            .clone()
            .unwrap_or_else(|| row.peer_id.to_string());
        let marker = if row.has_unread() { "*" } else { " " };
        let prefix = if row.last_message.sender_id == me { "you: " } else { "" };
        out.push_str(&format!(
            "{} {:<24} {}{}  ({})\n",
            marker,
            name,
            prefix,
            preview(&row.last_message.content, 40),
            format_timestamp(row.last_message.created_at)
        ));
    }
    out
}
