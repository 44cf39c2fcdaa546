//! Client scenarios against the SQLite store.

use dmsync_client::{ClientConfig, LiveView, MessageStore, MessagingClient, ThreadSnapshot};
use dmsync_relay::storage::SqliteStore;
use dmsync_types::UserId;
use std::time::Duration;

type RelayClient = MessagingClient<SqliteStore, SqliteStore>;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_retry_base(Duration::from_millis(1))
        .with_feed_backoff_cap(Duration::from_millis(20))
}

fn client_for(store: &SqliteStore, user: UserId) -> RelayClient {
    let handle = store.session_for(user);
    MessagingClient::new(handle.clone(), handle, fast_config()).unwrap()
}

async fn register(store: &SqliteStore, name: &str) -> UserId {
    let user = UserId::new();
    store
        .session_for(user)
        .upsert_profile(user, name)
        .await
        .unwrap();
    user
}

async fn settle<T: Clone>(view: &mut LiveView<T>, predicate: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(WAIT, view.wait_for(predicate))
        .await
        .expect("view did not settle")
        .unwrap()
}

fn contents(snapshot: &ThreadSnapshot) -> Vec<String> {
    snapshot.messages().map(|m| m.content.clone()).collect()
}

#[tokio::test]
async fn history_preserves_send_order() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;

    let client = client_for(&store, u1);
    client.send_message(u2, "hi").await.unwrap();
    client.send_message(u2, "there").await.unwrap();

    let rows = store.session_for(u2).history(u1, u2).await.unwrap();
    let texts: Vec<_> = rows.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["hi", "there"]);
    assert!(rows[0].order_key() < rows[1].order_key());
}

#[tokio::test]
async fn opening_thread_marks_prior_messages_read() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;
    let sender = store.session_for(u1);
    sender.send(u1, u2, "hi").await.unwrap();
    sender.send(u1, u2, "there").await.unwrap();

    let client = client_for(&store, u2);
    let mut badge = client.unread_badge(u2).await.unwrap();
    assert_eq!(badge.current(), 2);

    let mut thread = client.open_thread(u2, u1).await.unwrap();
    assert_eq!(contents(&thread.current()), vec!["hi", "there"]);

    let snapshot = settle(&mut thread, |t| t.messages().all(|m| m.read_at.is_some())).await;
    assert_eq!(snapshot.peer_display_name.as_deref(), Some("u1"));
    assert_eq!(settle(&mut badge, |n| *n == 0).await, 0);

    let reader = store.session_for(u2);
    assert_eq!(reader.unread_count(u2).await.unwrap(), 0);
    assert!(sender
        .history(u1, u2)
        .await
        .unwrap()
        .iter()
        .all(|m| m.read_at.is_some()));
}

#[tokio::test]
async fn arrival_in_open_thread_is_appended_and_read() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;
    let sender = store.session_for(u1);
    sender.send(u1, u2, "one").await.unwrap();
    sender.send(u1, u2, "two").await.unwrap();

    let client = client_for(&store, u2);
    let mut badge = client.unread_badge(u2).await.unwrap();
    let mut thread = client.open_thread(u2, u1).await.unwrap();
    settle(&mut badge, |n| *n == 0).await;
    settle(&mut thread, |t| t.messages().all(|m| m.read_at.is_some())).await;

    let third = sender.send(u1, u2, "three").await.unwrap();
    let snapshot = settle(&mut thread, |t| {
        t.len() == 3 && t.messages().all(|m| m.read_at.is_some())
    })
    .await;
    assert_eq!(contents(&snapshot), vec!["one", "two", "three"]);
    assert_eq!(snapshot.lines[2].message.id, third.id);

    assert_eq!(badge.current(), 0);
    assert_eq!(
        store.session_for(u2).unread_count(u2).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn inbox_lists_most_recent_peer_first() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;
    let u3 = register(&store, "u3").await;

    store.session_for(u3).send(u3, u2, "earlier").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.session_for(u1).send(u1, u2, "later").await.unwrap();

    let client = client_for(&store, u2);
    let inbox = client.open_inbox(u2).await.unwrap();
    let rows = inbox.current();
    let peers: Vec<_> = rows.iter().map(|r| r.peer_id).collect();
    assert_eq!(peers, vec![u1, u3]);
    assert_eq!(rows[0].peer_display_name.as_deref(), Some("u1"));
    assert!(rows.iter().all(|r| r.has_unread()));
}

#[tokio::test]
async fn live_inbox_reorders_on_new_message() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;
    let u3 = register(&store, "u3").await;
    store.session_for(u3).send(u3, u2, "first").await.unwrap();
    store.session_for(u1).send(u1, u2, "second").await.unwrap();

    let client = client_for(&store, u2);
    let mut inbox = client.open_inbox(u2).await.unwrap();
    assert_eq!(inbox.current()[0].peer_id, u1);

    store.session_for(u3).send(u3, u2, "third").await.unwrap();
    let rows = settle(&mut inbox, |rows| {
        rows.first().map(|r| r.peer_id) == Some(u3)
    })
    .await;
    assert_eq!(rows[0].last_message.content, "third");
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn second_tab_badge_follows_reads_elsewhere() {
    let store = SqliteStore::in_memory().await.unwrap();
    let u1 = register(&store, "u1").await;
    let u2 = register(&store, "u2").await;
    store.session_for(u1).send(u1, u2, "hi").await.unwrap();

    let phone = client_for(&store, u2);
    let laptop = client_for(&store, u2);
    let mut phone_badge = phone.unread_badge(u2).await.unwrap();
    assert_eq!(phone_badge.current(), 1);

    laptop.open_thread(u2, u1).await.unwrap();
    assert_eq!(settle(&mut phone_badge, |n| *n == 0).await, 0);
}
