use async_trait::async_trait;
use bytes::Bytes;
use hub::transport::ChannelPeer;
use hub::{
    channel_pair, ClientHandle, ClientState, CloseReason, Envelope, Hub, HubConfig,
    InboundHandler, InvalidationInstruction, MessageType, OverflowPolicy,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn invalidation(keys: &[&str]) -> Envelope {
    Envelope::invalidation(&InvalidationInstruction::for_keys(keys.iter().copied())).unwrap()
}

async fn next_envelope(peer: &mut ChannelPeer) -> Envelope {
    timeout(WAIT, peer.recv())
        .await
        .expect("peer timed out waiting for an envelope")
        .expect("client side closed")
        .expect("client wrote an undecodable frame")
}

async fn wait_closed(client: &ClientHandle) {
    timeout(WAIT, client.wait_closed())
        .await
        .expect("client did not close in time");
}

#[tokio::test]
async fn group_publish_reaches_every_client_of_every_member() {
    let hub = Hub::default();
    let (c1, mut p1) = channel_pair(8);
    let (c2, mut p2) = channel_pair(8);
    let (c3, mut p3) = channel_pair(8);
    hub.register(7, [3], c1);
    hub.register(7, [3], c2);
    hub.register(9, [4], c3);

    let delivered = hub.publish_to_group(3, invalidation(&["settings"]));
    assert_eq!(delivered, 2);

    for peer in [&mut p1, &mut p2] {
        let envelope = next_envelope(peer).await;
        assert_eq!(envelope.message_type(), &MessageType::Invalidate);
        let instruction: InvalidationInstruction = envelope.payload_json().unwrap();
        assert_eq!(instruction.target_keys, vec!["settings"]);
    }
    assert!(p3.try_recv().is_none());

    hub.shutdown().await;
}

#[tokio::test]
async fn stalled_peer_is_disconnected_when_its_mailbox_overflows() {
    let config = HubConfig::default()
        .with_mailbox_capacity(2)
        .with_overflow_policy(OverflowPolicy::Disconnect);
    let hub = Hub::new(config);
    // The peer never reads, so at most one frame leaves the client.
    let (connection, _peer) = channel_pair(1);
    let client = hub.register(7, [3], connection);

    assert_eq!(hub.publish_to_user(7, invalidation(&["a"])), 1);
    assert_eq!(hub.publish_to_user(7, invalidation(&["b"])), 1);
    assert_eq!(hub.publish_to_user(7, invalidation(&["c"])), 0);

    wait_closed(&client).await;
    assert_eq!(client.close_reason(), Some(CloseReason::MailboxOverflow));
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(hub.subject_client_count(7), 0);
    assert_eq!(hub.group_member_count(3), 0);
    assert_eq!(hub.publish_to_user(7, invalidation(&["d"])), 0);
}

#[tokio::test]
async fn stalled_peer_keeps_its_connection_under_drop_newest() {
    let config = HubConfig::default()
        .with_mailbox_capacity(2)
        .with_overflow_policy(OverflowPolicy::DropNewest);
    let hub = Hub::new(config);
    let (connection, mut peer) = channel_pair(1);
    let client = hub.register(7, [], connection);

    assert_eq!(hub.publish_to_user(7, invalidation(&["a"])), 1);
    assert_eq!(hub.publish_to_user(7, invalidation(&["b"])), 1);
    assert_eq!(hub.publish_to_user(7, invalidation(&["c"])), 0);
    assert!(client.is_open());

    let first: InvalidationInstruction = next_envelope(&mut peer).await.payload_json().unwrap();
    let second: InvalidationInstruction = next_envelope(&mut peer).await.payload_json().unwrap();
    assert_eq!(first.target_keys, vec!["a"]);
    assert_eq!(second.target_keys, vec!["b"]);
    assert_eq!(hub.subject_client_count(7), 1);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_dropped_after_the_pong_wait() {
    let config = HubConfig::default()
        .with_heartbeat(Duration::from_secs(9), Duration::from_secs(10));
    let hub = Hub::new(config);
    let (connection, mut peer) = channel_pair(8);
    let client = hub.register(7, [], connection);

    let ping = timeout(Duration::from_secs(60), peer.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ping, Envelope::ping());

    timeout(Duration::from_secs(60), client.wait_closed())
        .await
        .unwrap();
    assert_eq!(client.close_reason(), Some(CloseReason::HeartbeatTimeout));
    assert_eq!(hub.subject_client_count(7), 0);
}

#[tokio::test(start_paused = true)]
async fn peer_answering_pings_stays_connected() {
    let config = HubConfig::default()
        .with_heartbeat(Duration::from_secs(9), Duration::from_secs(10));
    let hub = Hub::new(config);
    let (connection, mut peer) = channel_pair(8);
    let client = hub.register(7, [], connection);

    let responder = tokio::spawn(async move {
        while let Some(Ok(envelope)) = peer.recv().await {
            if envelope.message_type() == &MessageType::Ping {
                peer.send(&Envelope::pong()).await.unwrap();
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(client.is_open());
    assert_eq!(hub.subject_client_count(7), 1);

    hub.shutdown().await;
    assert_eq!(client.close_reason(), Some(CloseReason::Shutdown));
    responder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn blocked_write_times_out() {
    let hub = Hub::default();
    let (connection, _peer) = channel_pair(1);
    let client = hub.register(7, [], connection);

    assert_eq!(hub.publish_to_user(7, invalidation(&["a"])), 1);
    assert_eq!(hub.publish_to_user(7, invalidation(&["b"])), 1);

    timeout(Duration::from_secs(30), client.wait_closed())
        .await
        .unwrap();
    assert_eq!(client.close_reason(), Some(CloseReason::WriteTimeout));
    assert_eq!(hub.client_count(), 0);
}

#[tokio::test]
async fn malformed_frame_closes_the_client() {
    let hub = Hub::default();
    let (connection, peer) = channel_pair(8);
    let client = hub.register(7, [3], connection);

    peer.send_raw("{not json").await.unwrap();

    wait_closed(&client).await;
    assert_eq!(client.close_reason(), Some(CloseReason::MalformedFrame));
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.group_member_count(3), 0);
}

#[tokio::test]
async fn peer_close_unregisters_the_client() {
    let hub = Hub::default();
    let (connection, peer) = channel_pair(8);
    let client = hub.register(7, [3], connection);

    drop(peer);

    wait_closed(&client).await;
    assert_eq!(client.close_reason(), Some(CloseReason::PeerClosed));
    assert_eq!(hub.subject_client_count(7), 0);
}

struct Recorder {
    seen: mpsc::UnboundedSender<(u64, Envelope)>,
}

#[async_trait]
impl InboundHandler for Recorder {
    async fn handle(&self, client: &ClientHandle, envelope: Envelope) {
        let _ = self.seen.send((client.subject_id(), envelope));
    }
}

#[tokio::test]
async fn recognized_inbound_messages_reach_the_handler_and_unknown_ones_are_ignored() {
    let (seen, mut recorded) = mpsc::unbounded_channel();
    let hub = Hub::default().with_inbound_handler(Arc::new(Recorder { seen }));
    let (connection, mut peer) = channel_pair(8);
    let client = hub.register(7, [], connection);

    peer.send_raw(r#"{"v":1,"type":"mystery","payload":{"x":1}}"#)
        .await
        .unwrap();
    let subscribe = Envelope::application(MessageType::Subscribe, r#"{"keys":["settings"]}"#)
        .unwrap();
    peer.send(&subscribe).await.unwrap();

    let (subject_id, envelope) = timeout(WAIT, recorded.recv()).await.unwrap().unwrap();
    assert_eq!(subject_id, 7);
    assert_eq!(envelope, subscribe);
    assert!(recorded.try_recv().is_err());
    assert!(client.is_open());

    assert_eq!(hub.publish_to_user(7, invalidation(&["settings"])), 1);
    assert_eq!(
        next_envelope(&mut peer).await.message_type(),
        &MessageType::Invalidate
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_client_and_rejects_new_ones() {
    let hub = Hub::default();
    let mut peers = Vec::new();
    let mut clients = Vec::new();
    for subject_id in [1, 2, 2] {
        let (connection, peer) = channel_pair(8);
        clients.push(hub.register(subject_id, [10], connection));
        peers.push(peer);
    }
    assert_eq!(hub.client_count(), 3);

    timeout(WAIT, hub.shutdown()).await.unwrap();

    for client in &clients {
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(client.close_reason(), Some(CloseReason::Shutdown));
    }
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.group_member_count(10), 0);

    let (connection, _peer) = channel_pair(8);
    let late = hub.register(3, [], connection);
    assert_eq!(late.state(), ClientState::Closed);
    assert_eq!(late.close_reason(), Some(CloseReason::Shutdown));
    assert_eq!(hub.client_count(), 0);
}

#[tokio::test]
async fn forced_unregister_closes_the_connection() {
    let hub = Hub::default();
    let (connection, mut peer) = channel_pair(8);
    let client = hub.register(7, [], connection);

    hub.unregister(client.id());
    hub.unregister(client.id());

    wait_closed(&client).await;
    assert_eq!(client.close_reason(), Some(CloseReason::Unregistered));
    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
}

struct Stalled;

#[async_trait]
impl InboundHandler for Stalled {
    async fn handle(&self, _client: &ClientHandle, _envelope: Envelope) {
        std::future::pending::<()>().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_inbound_handler_does_not_starve_heartbeats() {
    let mut config = HubConfig::default()
        .with_heartbeat(Duration::from_secs(9), Duration::from_secs(10));
    config.write_wait = Duration::from_secs(2);
    let hub = Hub::new(config).with_inbound_handler(Arc::new(Stalled));
    let (connection, mut peer) = channel_pair(8);
    let client = hub.register(7, [], connection);

    peer.send(&Envelope::application(MessageType::Subscribe, Bytes::new()).unwrap())
        .await
        .unwrap();
    let responder = tokio::spawn(async move {
        while let Some(Ok(envelope)) = peer.recv().await {
            if envelope.message_type() == &MessageType::Ping {
                peer.send(&Envelope::pong()).await.unwrap();
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(client.is_open());
    assert_eq!(hub.subject_client_count(7), 1);

    hub.shutdown().await;
    responder.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_churn_and_publishing_leave_no_residue() {
    const SUBJECTS: u64 = 4;
    const GROUP: u64 = 30;

    let hub = Arc::new(Hub::default());
    let stop = Arc::new(AtomicBool::new(false));

    let mut publishers = Vec::new();
    for worker in 0..3u64 {
        let hub = hub.clone();
        let stop = stop.clone();
        publishers.push(tokio::spawn(async move {
            let mut delivered = 0;
            while !stop.load(Ordering::Relaxed) {
                delivered += match worker {
                    0 => hub.publish_to_user(worker % SUBJECTS, invalidation(&["settings"])),
                    1 => hub.publish_to_group(GROUP, invalidation(&["members"])),
                    _ => hub.broadcast(invalidation(&["everything"])),
                };
                tokio::task::yield_now().await;
            }
            delivered
        }));
    }

    let mut churners = Vec::new();
    for worker in 0..8u64 {
        let hub = hub.clone();
        churners.push(tokio::spawn(async move {
            for round in 0..25u64 {
                let subject_id = (worker + round) % SUBJECTS;
                let (connection, peer) = channel_pair(8);
                let client = hub.register(subject_id, [GROUP, GROUP + worker], connection);
                if round % 3 == 0 {
                    hub.update_groups(client.id(), [GROUP + 1]);
                }
                tokio::task::yield_now().await;
                hub.unregister(client.id());
                wait_closed(&client).await;
                drop(peer);
            }
        }));
    }

    for churner in churners {
        churner.await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for publisher in publishers {
        publisher.await.unwrap();
    }

    assert_eq!(hub.client_count(), 0);
    for group_id in GROUP..GROUP + 8 {
        assert_eq!(hub.group_member_count(group_id), 0, "group {group_id}");
    }
    for subject_id in 0..SUBJECTS {
        assert_eq!(hub.subject_client_count(subject_id), 0, "subject {subject_id}");
    }
    assert_eq!(hub.index_sizes(), (0, 0));

    timeout(WAIT, hub.shutdown()).await.unwrap();
}
