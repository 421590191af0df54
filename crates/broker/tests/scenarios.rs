//! End-to-end scenarios wiring a `Broker` (and, for the WebSocket tests, a
//! real `StreamServer` listener) against an in-process mock upstream. These
//! mirror the concrete scenarios enumerated for the testable properties of
//! the system: group text normalization, whitelist denial, animated-sticker
//! drop, and a downstream WebSocket round trip.

use async_trait::async_trait;
use broker::pipeline::Broker;
use broker::rate_limited::RateLimitedUpstream;
use broker_core::{PolicyConfig, RpcRetryConfig, Segment, UpstreamError, Whitelist};
use enrich::{Enricher, NullMediaFetcher, UpstreamCaller};
use futures_util::{SinkExt, StreamExt};
use onebot::{EventSender, MessageEvent, NoticeEvent, RateLimiter, UpstreamEvent, UpstreamResponse};
use render::Renderer;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use stream::StreamServer;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

struct FakeUpstream;

#[async_trait]
impl UpstreamCaller for FakeUpstream {
    async fn call(
        &self,
        action: &str,
        _params: serde_json::Value,
        _timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let data = match action {
            "get_group_member_info" | "get_stranger_info" => {
                Some(serde_json::json!({"nickname": "A"}))
            }
            _ => None,
        };
        Ok(UpstreamResponse {
            status: "ok".to_string(),
            retcode: 0,
            data,
            message: None,
            wording: None,
            echo: None,
        })
    }
}

fn group_text_event() -> MessageEvent {
    MessageEvent {
        message_type: "group".to_string(),
        sub_type: None,
        message_id: 42,
        self_id: 1,
        user_id: 7,
        group_id: Some(100),
        group_name: None,
        time: 1700000000,
        message: vec![Segment::Text(broker_core::segment::TextData {
            text: "hi".to_string(),
        })],
        sender: EventSender {
            user_id: Some(7),
            nickname: Some("A".to_string()),
            card: None,
            role: Some("member".to_string()),
        },
    }
}

fn build_broker(whitelist: Whitelist, policy: PolicyConfig) -> (Broker, Arc<StreamServer>) {
    let upstream: Arc<dyn UpstreamCaller> = Arc::new(FakeUpstream);
    let limiter = Arc::new(RateLimiter::new(5, 0));
    let limited: Arc<dyn UpstreamCaller> = Arc::new(RateLimitedUpstream::new(upstream, limiter));
    let enricher = Enricher::new(limited.clone(), Arc::new(NullMediaFetcher));
    let renderer = Renderer::new(limited.clone());
    let stream = Arc::new(StreamServer::new(
        limited,
        Whitelist::default(),
        RpcRetryConfig::default(),
        "127.0.0.1",
        0,
    ));
    let broker = Broker::new(enricher, renderer, stream.clone(), Arc::new(whitelist), policy);
    (broker, stream)
}

#[tokio::test]
async fn scenario_group_text_normalization() {
    let (broker, stream) = build_broker(Whitelist::default(), PolicyConfig::default());
    let mut rx = stream.subscribe();

    broker
        .handle_event(UpstreamEvent::Message(group_text_event()))
        .await;

    let frame = rx.try_recv().expect("expected a broadcast frame");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "message");
    let summary = value["data"]["summary"].as_str().unwrap();
    assert!(summary.starts_with("消息ID: 42 | 会话: G:100 | 群聊"));
    assert!(summary.contains("发送者: A(QQ:7)"));
    let objective = value["data"]["objective"].as_str().unwrap();
    assert!(objective.starts_with("在群聊「100」里，A(QQ:7)，说：\"hi\""));
}

#[tokio::test]
async fn scenario_whitelist_denial_drops_silently() {
    let whitelist = Whitelist::new(HashSet::from([200]), HashSet::new());
    let (broker, stream) = build_broker(whitelist, PolicyConfig::default());
    let mut rx = stream.subscribe();

    broker
        .handle_event(UpstreamEvent::Message(group_text_event()))
        .await;

    assert!(rx.try_recv().is_err(), "denied group must not broadcast");
}

#[tokio::test]
async fn scenario_animated_sticker_only_is_dropped() {
    let mut policy = PolicyConfig::default();
    policy.skip_animated_emoji = true;
    let (broker, stream) = build_broker(Whitelist::default(), policy);
    let mut rx = stream.subscribe();

    let mut ev = group_text_event();
    ev.message = vec![Segment::Image(broker_core::segment::ImageData {
        file: "sticker.gif".to_string(),
        url: None,
        path: None,
        cache_path: None,
        summary: Some("[动画表情]".to_string()),
    })];

    broker.handle_event(UpstreamEvent::Message(ev)).await;

    assert!(rx.try_recv().is_err(), "animated-sticker-only message must not broadcast");
}

#[tokio::test]
async fn scenario_poke_in_group_always_broadcasts() {
    let (broker, stream) = build_broker(Whitelist::default(), PolicyConfig::default());
    let mut rx = stream.subscribe();

    let notice = NoticeEvent {
        notice_type: "notify".to_string(),
        sub_type: Some("poke".to_string()),
        self_id: 1,
        time: 1700000000,
        group_id: Some(100),
        user_id: Some(1),
        target_id: Some(1),
        extra: serde_json::Value::Null,
    };
    broker.handle_event(UpstreamEvent::Notice(notice)).await;

    let frame = rx.try_recv().expect("group poke must still broadcast");
    assert!(frame.contains("戳了戳"));
}

/// Spins a real `StreamServer` listener and drives the downstream WebSocket
/// protocol end to end: welcome on connect, `sdk` RPC denied by whitelist,
/// and a broadcast frame reaching a connected client.
#[tokio::test]
async fn scenario_downstream_websocket_round_trip() {
    let upstream: Arc<dyn UpstreamCaller> = Arc::new(FakeUpstream);
    let whitelist = Whitelist::new(HashSet::from([200]), HashSet::new());
    let server = StreamServer::new(upstream, whitelist, RpcRetryConfig::default(), "127.0.0.1", 19871);
    let broadcast_handle = server.clone();
    server.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut ws, _) = connect_async("ws://127.0.0.1:19871/ws")
        .await
        .expect("failed to connect to stream server");

    let welcome = ws.next().await.unwrap().unwrap();
    assert!(matches!(welcome, Message::Text(ref t) if t.contains("\"type\":\"welcome\"")));

    let sdk_request = serde_json::json!({
        "type": "sdk",
        "requestId": "r1",
        "path": "send.group",
        "args": [100, "hi"],
    });
    ws.send(Message::Text(sdk_request.to_string())).await.unwrap();

    let result = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = result else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "result");
    assert_eq!(value["requestId"], "r1");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"], "group_not_in_whitelist");

    broadcast_handle.broadcast(broker_core::Envelope::Message {
        data: broker_core::MessagePayload::Formatted(sample_broadcast_message()),
    });

    let broadcast_frame = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = broadcast_frame else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "message");

    ws.close(None).await.ok();
}

fn sample_broadcast_message() -> broker_core::FormattedMessage {
    broker_core::FormattedMessage {
        message_id: 99,
        time: 1700000000,
        time_str: "2023-11-14 22:13:20".to_string(),
        kind: broker_core::ConversationKind::Group,
        self_id: 1,
        sender_id: 7,
        sender_name: "A".to_string(),
        sender_card: None,
        sender_role: None,
        group_id: Some(100),
        group_name: None,
        text: "hi".to_string(),
        segments: vec![],
        media: broker_core::model::MediaRefs::default(),
        reply: None,
        summary: "summary".to_string(),
        objective: "objective".to_string(),
        raw: None,
    }
}
