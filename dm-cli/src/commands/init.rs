//! Initialize the local identity and register it in the store.

use anyhow::Result;
use std::path::Path;

use super::open_store;
use crate::config::Identity;

/// Run the init command.
pub async fn run(data_dir: &Path, database: &Path, name: &str) -> Result<()> {
    // Check if already initialized
    if Identity::exists(data_dir).await {
        anyhow::bail!(
            "Already initialized. Delete {} to reinitialize.",
            Identity::path(data_dir).display()
        );
    }

    // Register first so a taken name leaves no identity behind
    let mut identity = Identity::new(name);
    let store = open_store(database).await?.session_for(identity.user_id);
    let profile = store.upsert_profile(identity.user_id, name).await?;
    identity.display_name = profile.display_name;
    identity.save(data_dir).await?;

    println!("Identity created.");
    println!();
    println!("  User ID:  {}", identity.user_id);
    println!("  Name:     {}", identity.display_name);
    println!("  Database: {}", database.display());
    println!();
    println!("Next steps:");
    println!("  1. See who else is here: dm-cli users");
    println!("  2. Say hello: dm-cli send --to <name> \"hi\"");

    Ok(())
}
