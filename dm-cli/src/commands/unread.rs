//! Print the unread badge count.

use anyhow::Result;

use super::{print_json, Account};

/// Run the unread command.
pub async fn run(account: &Account, json: bool) -> Result<()> {
    let client = account.client()?;
    let badge = client.unread_badge(account.user_id()).await?;
    let count = badge.current();
    client.close_badge().await;

    if json {
        return print_json(&serde_json::json!({ "unread": count }));
    }
    println!("{}", count);
    Ok(())
}
