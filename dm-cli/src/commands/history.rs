//! Print a conversation without marking anything read.

use anyhow::Result;
use dmsync_client::MessageStore;
use dmsync_types::{Message, UserId};

use super::{format_timestamp, print_json, Account};

/// Run the history command.
pub async fn run(account: &Account, with: &str, json: bool) -> Result<()> {
    let peer = account.resolve_peer(with).await?;
    let me = account.user_id();
    let messages = account.store.history(me, peer.user_id).await?;

    if json {
        return print_json(&messages);
    }
    if messages.is_empty() {
        println!("No messages with {} yet.", peer.display_name);
        return Ok(());
    }
    for message in &messages {
        let author = if message.sender_id == me {
            account.identity.display_name.as_str()
        } else {
            peer.display_name.as_str()
        };
        println!("{}", render_line(message, author, me));
    }
    Ok(())
}

/// One message line with its read state from `me`'s point of view.
pub fn render_line(message: &Message, author: &str, me: UserId) -> String {
    let state = match (message.sender_id == me, message.is_read()) {
        (true, true) => " [read]",
        (true, false) => " [sent]",
        (false, false) => " [new]",
        (false, true) => "",
    };
    format!(
        "{:>10}  {}: {}{}",
        format_timestamp(message.created_at),
        author,
        message.content,
        state
    )
}
