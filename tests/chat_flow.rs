//! End-to-end scenarios over a real listener: two wire clients, live
//! delivery, read receipts, presence, and the offline durability path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use circlechat::channels::Channels;
use circlechat::chat::store::Message;
use circlechat::client::{ChatClient, SessionUpdate};
use circlechat::media::{DynMediaStore, FsMediaStore};
use circlechat::presence::Presence;
use circlechat::{app, db, AppState};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_server(media_dir: &Path) -> String {
    let db_pool = db::connect_in_memory().await.unwrap();
    let media: DynMediaStore = Arc::new(FsMediaStore::new(media_dir, "http://localhost/media"));
    let state = AppState {
        db_pool,
        presence: Presence::new(),
        channels: Channels::new(),
        media,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    format!("http://{addr}")
}

async fn wait_for_conversation(
    rx: &mut broadcast::Receiver<SessionUpdate>,
    mut pred: impl FnMut(&[Message]) -> bool,
) -> Vec<Message> {
    timeout(WAIT, async {
        loop {
            if let SessionUpdate::Conversation(messages) = rx.recv().await.unwrap() {
                if pred(&messages) {
                    return messages;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for a conversation update")
}

async fn wait_for_online(client: &Arc<ChatClient>, mut pred: impl FnMut(&[String]) -> bool) {
    timeout(WAIT, async {
        loop {
            if pred(&client.online_users().await) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for presence");
}

#[tokio::test]
async fn live_message_reaches_recipient_and_seen_flows_back() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = ChatClient::connect(&base, "alice").await.unwrap();
    let bob = ChatClient::connect(&base, "bob").await.unwrap();
    wait_for_online(&alice, |online| {
        online.contains(&"alice".to_owned()) && online.contains(&"bob".to_owned())
    })
    .await;

    alice.open_conversation("bob").await.unwrap();
    bob.open_conversation("alice").await.unwrap();
    let mut alice_rx = alice.subscribe_updates();
    let mut bob_rx = bob.subscribe_updates();

    let sent = alice.send_text("bob", "hi").await.unwrap();
    assert!(!sent.seen);

    // Bob's live channel delivers the message; his open conversation
    // acknowledges it automatically.
    let bob_view = wait_for_conversation(&mut bob_rx, |msgs| msgs.iter().any(|m| m.id == sent.id)).await;
    assert_eq!(bob_view.len(), 1);
    assert_eq!(bob_view[0].text.as_deref(), Some("hi"));

    // The acknowledgement comes back to Alice as updateSeen and flips her
    // local copy without a refetch.
    let alice_view =
        wait_for_conversation(&mut alice_rx, |msgs| msgs.iter().any(|m| m.id == sent.id && m.seen))
            .await;
    assert_eq!(alice_view.len(), 1);

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn duplicate_delivery_paths_merge_to_one_entry() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = ChatClient::connect(&base, "alice").await.unwrap();
    let bob = ChatClient::connect(&base, "bob").await.unwrap();
    wait_for_online(&alice, |online| online.contains(&"bob".to_owned())).await;

    // Seed history before Bob opens the view, then send live right after:
    // the first message races the history fetch against nothing, the
    // second races fetch against push.
    let first = alice.send_text("bob", "one").await.unwrap();

    bob.open_conversation("alice").await.unwrap();
    let mut bob_rx = bob.subscribe_updates();
    let second = alice.send_text("bob", "two").await.unwrap();

    let view = wait_for_conversation(&mut bob_rx, |msgs| {
        msgs.iter().any(|m| m.id == first.id) && msgs.iter().any(|m| m.id == second.id)
    })
    .await;

    assert_eq!(view.len(), 2);
    let mut expected = vec![(first.created_at, first.id), (second.created_at, second.id)];
    expected.sort();
    let got: Vec<_> = view.iter().map(|m| (m.created_at, m.id)).collect();
    assert_eq!(got, expected);

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn offline_recipient_still_gets_history() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = ChatClient::connect(&base, "alice").await.unwrap();
    // Bob is offline: the live publish is a no-op, the store is not.
    let sent = alice.send_text("bob", "you there?").await.unwrap();

    let bob = ChatClient::connect(&base, "bob").await.unwrap();
    bob.open_conversation("alice").await.unwrap();
    let mut bob_rx = bob.subscribe_updates();

    let view = wait_for_conversation(&mut bob_rx, |msgs| msgs.iter().any(|m| m.id == sent.id)).await;
    assert_eq!(view[0].text.as_deref(), Some("you there?"));

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn presence_tracks_joins_and_disconnects() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = ChatClient::connect(&base, "alice").await.unwrap();
    wait_for_online(&alice, |online| online.len() == 1 && online[0] == "alice").await;

    let bob = ChatClient::connect(&base, "bob").await.unwrap();
    wait_for_online(&alice, |online| online.contains(&"bob".to_owned())).await;

    bob.disconnect().await;
    wait_for_online(&alice, |online| !online.contains(&"bob".to_owned())).await;

    alice.disconnect().await;
}

#[tokio::test]
async fn http_api_round_trip_and_rejections() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let bob = reqwest::Client::builder().cookie_store(true).build().unwrap();

    // History without a session is rejected before touching the store.
    let anon = reqwest::Client::new();
    let status = anon
        .post(format!("{base}/api/messages/get"))
        .json(&serde_json::json!({ "to_user_id": "bob" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 401);

    for (client, user) in [(&alice, "alice"), (&bob, "bob")] {
        let status = client
            .post(format!("{base}/login"))
            .json(&serde_json::json!({ "user_id": user }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 204);
    }

    // A text message with no text never reaches the store.
    let form = reqwest::multipart::Form::new()
        .text("to_user_id", "bob")
        .text("message_type", "text");
    let status = alice
        .post(format!("{base}/api/messages/send"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 422);

    // Claiming another sender is an authorization mismatch.
    let form = reqwest::multipart::Form::new()
        .text("to_user_id", "bob")
        .text("from_user_id", "mallory")
        .text("message_type", "text")
        .text("text", "hi");
    let status = alice
        .post(format!("{base}/api/messages/send"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 403);

    let form = reqwest::multipart::Form::new()
        .text("to_user_id", "bob")
        .text("message_type", "text")
        .text("text", "hello bob");
    let sent: serde_json::Value = alice
        .post(format!("{base}/api/messages/send"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sent_id = sent["message"]["id"].as_str().unwrap().to_owned();

    // Both perspectives of the pair see the message exactly once.
    for (client, partner) in [(&alice, "bob"), (&bob, "alice")] {
        let body: serde_json::Value = client
            .post(format!("{base}/api/messages/get"))
            .json(&serde_json::json!({ "to_user_id": partner }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"].as_str().unwrap(), sent_id);
        assert_eq!(messages[0]["seen"], serde_json::json!(false));
    }
}

#[tokio::test]
async fn image_send_goes_through_the_media_store() {
    let media_dir = tempfile::tempdir().unwrap();
    let base = spawn_server(media_dir.path()).await;

    let alice = ChatClient::connect(&base, "alice").await.unwrap();
    let sent = alice
        .send_image("bob", "cat.png", b"png bytes".to_vec())
        .await
        .unwrap();

    let url = sent.media_url.expect("image message carries a media url");
    assert!(url.ends_with("-cat.png"));

    let object = url.rsplit('/').next().unwrap();
    let on_disk = tokio::fs::read(media_dir.path().join(object)).await.unwrap();
    assert_eq!(on_disk, b"png bytes");

    alice.disconnect().await;
}
