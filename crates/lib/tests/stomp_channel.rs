//! Integration test: a minimal STOMP broker over axum WebSockets (raw and SockJS framing).
//! The channel connects, subscribes to the user topic, receives a pushed doctor answer, and
//! disconnects cleanly on shutdown.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use carelink::channel::stomp::{decode_frames, Command, Frame};
use carelink::channel::{ChannelStatus, RealtimeMessageChannel};
use carelink::config::{ChannelFraming, Config};
use carelink::messages::MessageStore;
use carelink::session::Session;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Broker {
    sockjs: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Broker {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn wrap(&self, frame: &Frame) -> String {
        let text = frame.encode();
        if self.sockjs {
            format!("a{}", serde_json::Value::Array(vec![serde_json::Value::String(text)]))
        } else {
            text
        }
    }

    fn unwrap(&self, text: &str) -> Vec<Frame> {
        let payloads: Vec<String> = if self.sockjs {
            serde_json::from_str(text).expect("client SockJS frame is a JSON array")
        } else {
            vec![text.to_string()]
        };
        payloads
            .iter()
            .flat_map(|p| decode_frames(p).expect("client sent a valid STOMP frame"))
            .collect()
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(broker): State<Broker>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, broker))
}

async fn serve(mut socket: WebSocket, broker: Broker) {
    if broker.sockjs && socket.send(Message::Text("o".into())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        for frame in broker.unwrap(&text) {
            match frame.command {
                Command::Connect | Command::Stomp => {
                    broker.record(format!("CONNECT userId={}", frame.get("userId").unwrap_or("")));
                    let connected = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0");
                    let _ = socket.send(Message::Text(broker.wrap(&connected))).await;
                }
                Command::Subscribe => {
                    let destination = frame.get("destination").unwrap_or("").to_string();
                    let id = frame.get("id").unwrap_or("").to_string();
                    broker.record(format!("SUBSCRIBE {}", destination));
                    let garbage = Frame::new(Command::Message)
                        .header("destination", destination.clone())
                        .header("subscription", id.clone())
                        .body("not json");
                    let answer = Frame::new(Command::Message)
                        .header("destination", destination)
                        .header("subscription", id)
                        .header("content-type", "application/json")
                        .body(
                            serde_json::json!({
                                "id": 42,
                                "senderId": 3,
                                "senderName": "Dr. Han",
                                "senderRole": "ROLE_DOCTOR",
                                "receiverId": 7,
                                "content": "Give it small meals",
                                "messageType": "answer",
                                "regTime": "2025-03-01T10:20:30.5",
                                "isRead": false,
                            })
                            .to_string(),
                        );
                    let _ = socket.send(Message::Text(broker.wrap(&garbage))).await;
                    let _ = socket.send(Message::Text(broker.wrap(&answer))).await;
                }
                Command::Unsubscribe => broker.record("UNSUBSCRIBE".to_string()),
                Command::Disconnect => broker.record("DISCONNECT".to_string()),
                other => broker.record(format!("unexpected {}", other)),
            }
        }
    }
}

async fn start_broker(sockjs: bool) -> (Broker, Config) {
    let broker = Broker {
        sockjs,
        log: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/ws/websocket", get(upgrade))
        .route("/ws/:server/:session/websocket", get(upgrade))
        .with_state(broker.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let mut config = Config::default();
    config.server.base_url = format!("http://{}/", addr);
    config.channel.framing = if sockjs {
        ChannelFraming::SockJs
    } else {
        ChannelFraming::Raw
    };
    (broker, config)
}

async fn wait_for_entry(broker: &Broker, entry: &str) {
    for _ in 0..100 {
        if broker.entries().iter().any(|e| e == entry) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("broker never saw {:?}; log: {:?}", entry, broker.entries());
}

async fn receives_doctor_answer(sockjs: bool) {
    let (broker, config) = start_broker(sockjs).await;
    let store = MessageStore::new();
    let mut notifications = store.subscribe();
    let mut channel = RealtimeMessageChannel::from_config(&config, store.clone());

    channel.set_session(Some(&Session::new(7, "kim"))).await;

    let note = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("notification within 5s")
        .expect("notification feed open");
    assert_eq!(note.message_id, 42);
    assert_eq!(note.sender_name, "Dr. Han");

    let mut status = channel.watch_status();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.last_message.as_ref().map(|m| m.id) == Some(42)),
    )
    .await
    .expect("status updated")
    .expect("status feed open");
    assert!(channel.is_connected());
    assert_eq!(store.messages().await.len(), 1);
    assert_eq!(store.unread_count().await, 1);

    let entries = broker.entries();
    assert_eq!(entries[0], "CONNECT userId=7");
    assert_eq!(entries[1], "SUBSCRIBE /topic/chat/7");

    channel.shutdown().await;
    assert_eq!(channel.status(), ChannelStatus::default());
    wait_for_entry(&broker, "DISCONNECT").await;
    assert!(broker.entries().contains(&"UNSUBSCRIBE".to_string()));
}

#[tokio::test]
async fn raw_stomp_channel_delivers_doctor_answer() {
    receives_doctor_answer(false).await;
}

#[tokio::test]
async fn sockjs_stomp_channel_delivers_doctor_answer() {
    receives_doctor_answer(true).await;
}

#[tokio::test]
async fn unreachable_broker_keeps_reconnecting() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);

    let mut config = Config::default();
    config.server.base_url = format!("http://127.0.0.1:{}/", port);
    config.channel.reconnect = carelink::channel::ReconnectPolicy::fixed(Duration::from_secs(30));
    let mut channel = RealtimeMessageChannel::from_config(&config, MessageStore::new());
    channel.set_session(Some(&Session::new(7, "kim"))).await;

    let mut status = channel.watch_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.last_error.is_some()),
    )
    .await
    .expect("connect failure reported")
    .expect("status feed open");
    assert!(!channel.is_connected());

    tokio::time::timeout(Duration::from_secs(1), channel.shutdown())
        .await
        .expect("shutdown does not wait for the reconnect timer");
}
