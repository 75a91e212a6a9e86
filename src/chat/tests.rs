use super::*;
use crate::audit::{AuditSink, MemoryAuditSink};
use crate::config::ChatConfig;
use crate::state_sync::{BackingStore, MemoryStore, Origin, ReplicatedCache};
use anyhow::bail;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct MessageRecorder {
    tx: mpsc::UnboundedSender<(Message, Origin)>,
}

#[async_trait]
impl MessageListener for MessageRecorder {
    async fn on_message(&self, message: &Message, origin: Origin) -> Result<()> {
        let _ = self.tx.send((message.clone(), origin));
        Ok(())
    }
}

struct CaptionRecorder {
    tx: mpsc::UnboundedSender<(CaptionEvent, Origin)>,
}

#[async_trait]
impl CaptionListener for CaptionRecorder {
    async fn on_caption(&self, event: &CaptionEvent, origin: Origin) -> Result<()> {
        let _ = self.tx.send((event.clone(), origin));
        Ok(())
    }
}

struct BrokenListener;

#[async_trait]
impl MessageListener for BrokenListener {
    async fn on_message(&self, _message: &Message, _origin: Origin) -> Result<()> {
        bail!("broken")
    }
}

fn message_recorder() -> (
    Arc<dyn MessageListener>,
    mpsc::UnboundedReceiver<(Message, Origin)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(MessageRecorder { tx }), rx)
}

fn caption_recorder() -> (
    Arc<dyn CaptionListener>,
    mpsc::UnboundedReceiver<(CaptionEvent, Origin)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(CaptionRecorder { tx }), rx)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("channel closed")
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

fn local_manager() -> (ChatManager, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = ChatManager::new(
        Arc::new(ReplicatedCache::local()),
        audit.clone(),
        ChatConfig::default(),
    );
    (manager, audit)
}

async fn replicated_manager(store: &Arc<MemoryStore>) -> ChatManager {
    let cache = Arc::new(ReplicatedCache::new(Some(
        store.clone() as Arc<dyn BackingStore>
    )));
    assert!(cache.connect().await);
    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
    let manager = ChatManager::new(cache, audit, ChatConfig::default());
    assert!(manager.initialize().await);
    manager
}

#[tokio::test]
async fn test_pagination_before_id() {
    let (manager, _) = local_manager();
    let m1 = manager.send_message("r", "u", "one", MessageKind::Text).await;
    let m2 = manager.send_message("r", "u", "two", MessageKind::Text).await;
    let m3 = manager.send_message("r", "u", "three", MessageKind::Text).await;

    let page = manager.get_room_messages("r", Some(2), Some(&m3.id)).await;
    assert_eq!(page, vec![m1.clone(), m2.clone()]);

    let latest = manager.get_room_messages("r", Some(2), None).await;
    assert_eq!(latest, vec![m2.clone(), m3.clone()]);

    let before_first = manager.get_room_messages("r", None, Some(&m1.id)).await;
    assert!(before_first.is_empty());
}

#[tokio::test]
async fn test_pagination_edge_cases() {
    let (manager, _) = local_manager();
    let m1 = manager.send_message("r", "u", "one", MessageKind::Text).await;
    let m2 = manager.send_message("r", "u", "two", MessageKind::Text).await;

    // Unknown cursor is ignored.
    assert_eq!(
        manager.get_room_messages("r", None, Some("msg_missing")).await,
        vec![m1, m2]
    );
    assert!(manager.get_room_messages("r", Some(0), None).await.is_empty());
    assert!(manager.get_room_messages("empty", None, None).await.is_empty());
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (manager, _) = local_manager();
    manager.send_message("a", "u", "in a", MessageKind::Text).await;
    manager.send_message("b", "u", "in b", MessageKind::Text).await;

    let a = manager.get_room_messages("a", None, None).await;
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].content, "in a");
}

#[tokio::test]
async fn test_final_caption_appends_one_message() {
    let (manager, _) = local_manager();

    let update = manager
        .update_caption("r", "alice", "Hello", true, Some("en-US"))
        .await;
    let message = update.message.expect("final caption should create a message");
    assert_eq!(message.kind, MessageKind::Caption);
    assert_eq!(message.content, "Hello");

    let log = manager.get_room_messages("r", None, None).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, message.id);

    let captions = manager.get_room_captions("r").await;
    assert!(captions["alice"].is_final);
    assert_eq!(captions["alice"].text, "Hello");
    assert_eq!(captions["alice"].language, "en-US");
}

#[tokio::test]
async fn test_interim_and_blank_captions_do_not_append() {
    let (manager, _) = local_manager();

    let interim = manager.update_caption("r", "alice", "Hel", false, None).await;
    assert!(interim.message.is_none());
    assert_eq!(interim.caption.language, "zh-CN");

    let blank = manager.update_caption("r", "alice", "   ", true, None).await;
    assert!(blank.message.is_none());
    assert!(manager.get_room_messages("r", None, None).await.is_empty());

    // Only the latest caption per speaker is kept.
    let captions = manager.get_room_captions("r").await;
    assert_eq!(captions.len(), 1);
    assert_eq!(captions["alice"].text, "   ");
}

#[tokio::test]
async fn test_clear_room_captions() {
    let (manager, _) = local_manager();
    manager.update_caption("r", "alice", "a", false, None).await;
    manager.update_caption("r", "bob", "b", false, None).await;
    manager.update_caption("other", "carol", "c", false, None).await;

    assert_eq!(manager.clear_room_captions("r").await, 2);
    assert!(manager.get_room_captions("r").await.is_empty());
    assert_eq!(manager.get_room_captions("other").await.len(), 1);
}

#[tokio::test]
async fn test_local_mode_notifies_room_listeners() {
    let (manager, audit) = local_manager();
    assert!(!manager.initialize().await);
    assert!(!manager.is_replicated());

    let (listener, mut rx) = message_recorder();
    let (other, mut other_rx) = message_recorder();
    assert!(manager.add_message_listener("r", listener.clone()).await);
    assert!(!manager.add_message_listener("r", listener.clone()).await);
    manager.add_message_listener("elsewhere", other).await;

    let sent = manager.send_message("r", "u", "hi", MessageKind::Text).await;
    let (received, origin) = recv(&mut rx).await;
    assert_eq!(received, sent);
    assert_eq!(origin, Origin::Local);
    // Registered twice, delivered once.
    assert!(rx.try_recv().is_err());
    assert!(other_rx.try_recv().is_err());

    assert_eq!(audit.events(), vec!["chat.message_sent".to_string()]);
    assert_eq!(audit.records()[0].details["room"], "r");
}

#[tokio::test]
async fn test_listener_removal_drops_room_entry() {
    let (manager, _) = local_manager();
    let (first, _rx1) = message_recorder();
    let (second, _rx2) = message_recorder();

    manager.add_message_listener("r", first.clone()).await;
    manager.add_message_listener("r", second.clone()).await;
    assert!(manager.remove_message_listener("r", &first).await);
    assert!(manager.has_message_listeners("r").await);
    assert!(manager.remove_message_listener("r", &second).await);
    assert!(!manager.has_message_listeners("r").await);
    assert!(!manager.remove_message_listener("r", &second).await);

    let (captions, _crx) = caption_recorder();
    manager.add_caption_listener("r", captions.clone()).await;
    assert!(manager.has_caption_listeners("r").await);
    assert!(manager.remove_caption_listener("r", &captions).await);
    assert!(!manager.has_caption_listeners("r").await);
}

#[tokio::test]
async fn test_broken_listener_is_isolated() {
    let (manager, _) = local_manager();
    let broken: Arc<dyn MessageListener> = Arc::new(BrokenListener);
    let (listener, mut rx) = message_recorder();
    manager.add_message_listener("r", broken).await;
    manager.add_message_listener("r", listener).await;

    manager.send_message("r", "u", "still delivered", MessageKind::Text).await;
    assert_eq!(recv(&mut rx).await.0.content, "still delivered");
}

#[tokio::test]
async fn test_local_caption_listener_sees_update() {
    let (manager, _) = local_manager();
    let (listener, mut rx) = caption_recorder();
    manager.add_caption_listener("r", listener).await;

    manager.update_caption("r", "alice", "hey", false, None).await;
    let (event, origin) = recv(&mut rx).await;
    assert_eq!(event.user_id, "alice");
    assert_eq!(event.caption.unwrap().text, "hey");
    assert_eq!(origin, Origin::Local);
}

#[tokio::test]
async fn test_replicated_message_reaches_other_instance() {
    let store = Arc::new(MemoryStore::new());
    let a = replicated_manager(&store).await;
    let b = replicated_manager(&store).await;
    assert!(a.is_replicated());

    let (a_listener, mut a_rx) = message_recorder();
    let (b_listener, mut b_rx) = message_recorder();
    a.add_message_listener("r", a_listener).await;
    b.add_message_listener("r", b_listener).await;

    let sent = a.send_message("r", "alice", "hello", MessageKind::Text).await;

    let (local, local_origin) = recv(&mut a_rx).await;
    assert_eq!(local, sent);
    assert_eq!(local_origin, Origin::Local);

    let (remote, remote_origin) = recv(&mut b_rx).await;
    assert_eq!(remote, sent);
    assert_eq!(remote_origin, Origin::Remote);

    assert_eq!(b.get_room_messages("r", None, None).await, vec![sent.clone()]);
    // The sender's own log is not duplicated by its propagation echo.
    assert_eq!(a.get_room_messages("r", None, None).await, vec![sent]);
}

#[tokio::test]
async fn test_replicated_captions_and_clears() {
    let store = Arc::new(MemoryStore::new());
    let a = replicated_manager(&store).await;
    let b = replicated_manager(&store).await;
    let (b_captions, mut b_rx) = caption_recorder();
    b.add_caption_listener("r", b_captions).await;

    a.update_caption("r", "alice", "Hello", true, None).await;

    let (event, origin) = recv(&mut b_rx).await;
    assert_eq!(origin, Origin::Remote);
    assert_eq!(event.caption.as_ref().map(|c| c.is_final), Some(true));
    wait_until(|| async { b.get_room_captions("r").await.contains_key("alice") }).await;
    wait_until(|| async { b.get_room_messages("r", None, None).await.len() == 1 }).await;

    a.clear_room_captions("r").await;
    let (cleared, _) = recv(&mut b_rx).await;
    assert!(cleared.caption.is_none());
    wait_until(|| async { b.get_room_captions("r").await.is_empty() }).await;

    a.clear_room_messages("r").await;
    wait_until(|| async { b.get_room_messages("r", None, None).await.is_empty() }).await;
}

#[tokio::test]
async fn test_shutdown_releases_subscriptions() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(ReplicatedCache::new(Some(
        store.clone() as Arc<dyn BackingStore>
    )));
    assert!(cache.connect().await);
    let manager = ChatManager::new(
        cache.clone(),
        Arc::new(MemoryAuditSink::new()),
        ChatConfig::default(),
    );

    assert!(manager.initialize().await);
    assert_eq!(cache.active_listener_tasks().await, 2);

    manager.shutdown().await;
    assert!(!manager.is_replicated());
    assert_eq!(cache.active_listener_tasks().await, 0);
}

#[tokio::test]
async fn test_room_names_with_colons_stay_isolated_across_instances() {
    let store = Arc::new(MemoryStore::new());
    let a = replicated_manager(&store).await;
    let b = replicated_manager(&store).await;
    let (outer, mut outer_rx) = caption_recorder();
    let (inner, mut inner_rx) = caption_recorder();
    b.add_caption_listener("ops", outer).await;
    b.add_caption_listener("ops:east", inner).await;

    a.update_caption("ops:east", "alice", "secret", false, None)
        .await;

    let (event, origin) = recv(&mut inner_rx).await;
    assert_eq!(origin, Origin::Remote);
    assert_eq!(event.room, "ops:east");
    assert_eq!(event.user_id, "alice");
    wait_until(|| async { b.get_room_captions("ops:east").await.contains_key("alice") }).await;
    assert!(b.get_room_captions("ops").await.is_empty());
    assert!(outer_rx.try_recv().is_err());

    a.clear_room_captions("ops:east").await;
    let (cleared, _) = recv(&mut inner_rx).await;
    assert_eq!(cleared.room, "ops:east");
    assert!(cleared.caption.is_none());
    wait_until(|| async { b.get_room_captions("ops:east").await.is_empty() }).await;
    assert!(outer_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_store_outage_falls_back_to_local_delivery() {
    let store = Arc::new(MemoryStore::new());
    let manager = replicated_manager(&store).await;
    let (messages, mut message_rx) = message_recorder();
    let (captions, mut caption_rx) = caption_recorder();
    manager.add_message_listener("r", messages).await;
    manager.add_caption_listener("r", captions).await;

    store.set_available(false);

    let sent = manager.send_message("r", "u", "during outage", MessageKind::Text).await;
    let (received, origin) = recv(&mut message_rx).await;
    assert_eq!(received, sent);
    assert_eq!(origin, Origin::Local);

    manager.update_caption("r", "alice", "still live", false, None).await;
    let (event, origin) = recv(&mut caption_rx).await;
    assert_eq!(event.caption.map(|c| c.text), Some("still live".to_string()));
    assert_eq!(origin, Origin::Local);

    assert_eq!(manager.get_room_messages("r", None, None).await, vec![sent]);
}

#[tokio::test]
async fn test_delivery_guard_holds_back_later_sends() {
    let (manager, _) = local_manager();
    let manager = Arc::new(manager);

    let (first, guard) = manager
        .send_message_ordered("r", "u", "first", MessageKind::Text)
        .await;

    let sender = manager.clone();
    let second = tokio::spawn(async move {
        sender
            .send_message("r", "u", "second", MessageKind::Text)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_room_messages("r", None, None).await, vec![first.clone()]);

    drop(guard);
    let second = second.await.unwrap();
    assert_eq!(
        manager.get_room_messages("r", None, None).await,
        vec![first, second]
    );
}
