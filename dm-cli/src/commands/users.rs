//! List registered users.

use anyhow::Result;
use dmsync_types::UserId;
use serde::Serialize;

use super::{print_json, Account};

#[derive(Debug, Serialize)]
struct UserEntry {
    user_id: UserId,
    display_name: String,
    you: bool,
}

/// Run the users command.
pub async fn run(account: &Account, json: bool) -> Result<()> {
    let users: Vec<UserEntry> = account
        .store
        .profiles()
        .await?
        .into_iter()
        .map(|p| UserEntry {
            you: p.user_id == account.user_id(),
            user_id: p.user_id,
            display_name: p.display_name,
        })
        .collect();

    if json {
        return print_json(&users);
    }

    for user in &users {
        let marker = if user.you { " (you)" } else { "" };
        println!("{:<24} {}{}", user.display_name, user.user_id, marker);
    }
    Ok(())
}
