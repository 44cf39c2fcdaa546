//! Send a direct message.

use anyhow::Result;

use super::{print_json, Account};

/// Run the send command.
pub async fn run(account: &Account, to: &str, content: &str, json: bool) -> Result<()> {
    let peer = account.resolve_peer(to).await?;
    let client = account.client()?;
    let message = client.send_message(peer.user_id, content).await?;

    if json {
        return print_json(&message);
    }
    println!("Sent message #{} to {}", message.id, peer.display_name);
    Ok(())
}
