//! Session client tests against a scripted in-memory transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use confab_foundation::{SessionError, SessionState};
use confab_session::{
    connect_with_retry, RetryPolicy, RetryState, SessionClient, SessionConnector, SessionEvent,
    SessionTransport,
};

const SETUP_COMPLETE: &str = r#"{"setupComplete":{}}"#;

enum Outcome {
    Accept,
    Refuse,
}

/// Handle the test keeps for each accepted connection: a feed for inbound
/// messages and the record of everything the client sent.
#[derive(Clone)]
struct TransportLink {
    feed: mpsc::UnboundedSender<Result<String, SessionError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, SessionError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn send_text(&mut self, payload: String) -> Result<(), SessionError> {
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String, SessionError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) {}
}

#[derive(Default)]
struct FakeConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    links: Mutex<Vec<TransportLink>>,
    connect_calls: AtomicUsize,
}

impl FakeConnector {
    fn scripted(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    fn last_link(&self) -> TransportLink {
        self.links.lock().last().expect("no connection made").clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn SessionTransport>, SessionError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().pop_front().unwrap_or(Outcome::Accept) {
            Outcome::Refuse => Err(SessionError::Transport("connection refused".into())),
            Outcome::Accept => {
                let (feed, incoming) = mpsc::unbounded_channel();
                // The handshake response is ready before the client asks.
                feed.send(Ok(SETUP_COMPLETE.to_string())).unwrap();
                let sent = Arc::new(Mutex::new(Vec::new()));
                self.links.lock().push(TransportLink {
                    feed,
                    sent: Arc::clone(&sent),
                });
                Ok(Box::new(FakeTransport { incoming, sent }))
            }
        }
    }
}

fn client_with(connector: Arc<FakeConnector>) -> SessionClient {
    SessionClient::new(connector, "wss://example.invalid/session")
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn connect_performs_setup_handshake_and_opens() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    let mut events = client.subscribe();

    client.connect("models/demo-live", None).await.unwrap();
    assert_eq!(client.state(), SessionState::Open);

    match next_event(&mut events).await {
        SessionEvent::Status { state, detail } => {
            assert_eq!(state, SessionState::Open);
            assert_eq!(detail.as_deref(), Some("connected"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let link = connector.last_link();
    let sent = link.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(r#""setup""#));
    assert!(sent[0].contains("models/demo-live"));
}

#[tokio::test]
async fn send_audio_is_a_noop_unless_open() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());

    // Idle: dropped silently, no transport exists to touch.
    client.send_audio("AAAA");
    assert_eq!(connector.calls(), 0);

    client.connect("models/demo-live", None).await.unwrap();
    let link = connector.last_link();

    client.send_audio("AAAA");
    wait_until(|| link.sent.lock().len() == 2).await;
    assert!(link.sent.lock()[1].contains(r#""realtimeInput""#));

    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Closed);

    // Closed: dropped again; nothing new reaches the old transport.
    client.send_audio("BBBB");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(link.sent.lock().len(), 2);
}

#[tokio::test]
async fn remote_close_surfaces_disconnected_and_reconnecting_state() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();
    let mut events = client.subscribe();

    // Dropping the feed ends the inbound stream: a remote close.
    drop(connector.last_link().feed);

    loop {
        if let SessionEvent::Disconnected = next_event(&mut events).await {
            break;
        }
    }
    assert_eq!(client.state(), SessionState::Reconnecting);
}

#[tokio::test]
async fn inbound_audio_is_decoded_and_emitted_in_order() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();
    let mut events = client.subscribe();
    let link = connector.last_link();

    // "AAAA" decodes to three zero bytes; a second chunk follows.
    link.feed
        .send(Ok(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#
                .to_string(),
        ))
        .unwrap();
    link.feed
        .send(Ok(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"/38A"}}]}}}"#
                .to_string(),
        ))
        .unwrap();

    match next_event(&mut events).await {
        SessionEvent::AudioResponse { pcm } => assert_eq!(pcm, vec![0, 0, 0]),
        other => panic!("unexpected event {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::AudioResponse { pcm } => assert_eq!(pcm.len(), 3),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn malformed_audio_payload_does_not_kill_the_session() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();
    let mut events = client.subscribe();
    let link = connector.last_link();

    link.feed
        .send(Ok(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"!!notbase64!!"}}]}}}"#
                .to_string(),
        ))
        .unwrap();

    match next_event(&mut events).await {
        SessionEvent::Error { message } => assert!(message.contains("audio")),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.state(), SessionState::Open);
}

#[tokio::test]
async fn transcript_deltas_merge_by_speaker() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();
    let link = connector.last_link();

    for raw in [
        r#"{"serverContent":{"inputTranscription":{"text":"Hel"}}}"#,
        r#"{"serverContent":{"inputTranscription":{"text":"lo"}}}"#,
        r#"{"serverContent":{"outputTranscription":{"text":"Hi"}}}"#,
    ] {
        link.feed.send(Ok(raw.to_string())).unwrap();
    }

    wait_until(|| client.transcript_lines().len() == 2).await;
    assert_eq!(client.transcript_lines(), vec!["User: Hello", "AI: Hi"]);
}

#[tokio::test]
async fn interruption_and_turn_complete_are_forwarded() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();
    let mut events = client.subscribe();
    let link = connector.last_link();

    link.feed
        .send(Ok(r#"{"serverContent":{"interrupted":true}}"#.to_string()))
        .unwrap();
    link.feed
        .send(Ok(r#"{"serverContent":{"turnComplete":true}}"#.to_string()))
        .unwrap();
    link.feed
        .send(Ok(r#"{"usageMetadata":{"totalTokenCount":42}}"#.to_string()))
        .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Interrupted
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::TurnComplete
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Quota { total_tokens: 42 }
    ));
}

#[tokio::test]
async fn three_failed_attempts_end_in_failed_with_no_auto_retry() {
    let connector =
        FakeConnector::scripted(vec![Outcome::Refuse, Outcome::Refuse, Outcome::Refuse]);
    let mut client = client_with(connector.clone());
    let policy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(5),
    };
    let mut retry = RetryState::new();

    let err = connect_with_retry(&mut client, "models/demo-live", None, &policy, &mut retry)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RetryExhausted { attempts: 3 }));
    assert_eq!(client.state(), SessionState::Failed);
    assert_eq!(connector.calls(), 3);

    // Terminal: nothing fires on its own after exhaustion.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.calls(), 3);

    // A manual connect resets the counter before trying, and succeeds.
    connector.outcomes.lock().push_back(Outcome::Accept);
    connect_with_retry(&mut client, "models/demo-live", None, &policy, &mut retry)
        .await
        .unwrap();
    assert_eq!(client.state(), SessionState::Open);
    assert_eq!(retry.attempts(), 0);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let connector = FakeConnector::scripted(vec![Outcome::Accept]);
    let mut client = client_with(connector.clone());
    client.connect("models/demo-live", None).await.unwrap();

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Closed);

    // And safe before any connect at all.
    let mut fresh = client_with(FakeConnector::scripted(vec![]));
    fresh.disconnect().await;
    assert_eq!(fresh.state(), SessionState::Closed);
}
