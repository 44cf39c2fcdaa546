//! Open a conversation and mark it read.

use anyhow::Result;

use super::history::render_line;
use super::{print_json, Account};

/// Run the open command.
///
/// Every unread message from the peer is marked read before this returns.
pub async fn run(account: &Account, with: &str, json: bool) -> Result<()> {
    let peer = account.resolve_peer(with).await?;
    let me = account.user_id();
    let client = account.client()?;
    let view = client.open_thread(me, peer.user_id).await?;
    let snapshot = view.current();
    client.close_thread().await;

    if json {
        let messages: Vec<_> = snapshot.messages().collect();
        return print_json(&messages);
    }

    let peer_name = snapshot
        .peer_display_name
        .clone()
        .unwrap_or(peer.display_name);
    println!("=== {} ===", peer_name);
    if snapshot.is_empty() {
        println!("No messages yet.");
    }
    for line in &snapshot.lines {
        let author = if line.message.sender_id == me {
            account.identity.display_name.clone()
        } else {
            line.sender_display_name
                .clone()
                .unwrap_or_else(|| peer_name.clone())
        };
        println!("{}", render_line(&line.message, &author, me));
    }
    Ok(())
}
