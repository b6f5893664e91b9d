// Shared test doubles: an in-memory concentrator, a scripted broker, and a
// recording registrar.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lrsc_api::codec::{HELLO, PROTOCOL_VERSION};
use lrsc_api::{Broker, BrokerMessage, Dialer, Error as ApiError, Registrar, Registration};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{Mutex, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

// ── Concentrator ────────────────────────────────────────────────────

/// Dialer that hands the far end of every new duplex pipe to the test.
pub struct MemoryDialer {
    peers: mpsc::UnboundedSender<DuplexStream>,
    failures: Arc<AtomicUsize>,
}

impl MemoryDialer {
    pub fn new() -> (Self, PeerListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicUsize::new(0));
        (
            Self {
                peers: tx,
                failures: Arc::clone(&failures),
            },
            PeerListener { peers: rx, failures },
        )
    }
}

impl Dialer for MemoryDialer {
    type Stream = DuplexStream;

    async fn dial(&self) -> Result<DuplexStream, ApiError> {
        let refused = || ApiError::Connect {
            endpoint: "memory:55055".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(refused());
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        self.peers.send(server).map_err(|_| refused())?;
        Ok(client)
    }

    fn endpoint(&self) -> &str {
        "memory:55055"
    }
}

pub struct PeerListener {
    peers: mpsc::UnboundedReceiver<DuplexStream>,
    failures: Arc<AtomicUsize>,
}

impl PeerListener {
    /// Make the next `n` dials fail.
    pub fn refuse_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Wait for the next dial and complete the handshake.
    pub async fn accept(&mut self) -> Peer {
        let stream = tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no dial within timeout")
            .expect("dialer dropped");
        let mut peer = Peer {
            stream: BufReader::new(stream),
        };
        peer.complete_handshake().await;
        peer
    }
}

/// Concentrator end of one session.
pub struct Peer {
    stream: BufReader<DuplexStream>,
}

impl Peer {
    async fn complete_handshake(&mut self) {
        let mut buf = vec![0; PROTOCOL_VERSION.len() + HELLO.len() + 2];
        self.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            format!("{PROTOCOL_VERSION}{HELLO}\n\n")
        );
        self.send_line(r#"{"msgtag":0,"eui":"00-00-00-00-00-00-00-00"}"#).await;
    }

    pub async fn send_line(&mut self, line: &str) {
        self.stream
            .get_mut()
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next message the bridge wrote, as JSON.
    pub async fn read_message(&mut self) -> serde_json::Value {
        tokio::time::timeout(WAIT, async {
            let mut line = String::new();
            loop {
                line.clear();
                let n = self.stream.read_line(&mut line).await.unwrap();
                assert!(n > 0, "bridge closed the socket");
                if !line.trim().is_empty() {
                    return serde_json::from_str(line.trim()).unwrap();
                }
            }
        })
        .await
        .expect("no message within timeout")
    }

    /// Wait until the bridge closes this session.
    pub async fn closed(&mut self) {
        let mut rest = Vec::new();
        tokio::time::timeout(WAIT, self.stream.read_to_end(&mut rest))
            .await
            .expect("session still open")
            .unwrap();
    }
}

// ── Broker ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct BrokerState {
    pub connects: AtomicUsize,
    pub subscriptions: std::sync::Mutex<Vec<String>>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Result<BrokerMessage, ApiError>>>>,
    published: Mutex<Option<mpsc::UnboundedSender<(String, Vec<u8>)>>>,
}

/// Broker whose inbound traffic is scripted by the test.
pub struct MockBroker {
    state: Arc<BrokerState>,
}

pub struct BrokerHandle {
    pub state: Arc<BrokerState>,
    incoming: mpsc::UnboundedSender<Result<BrokerMessage, ApiError>>,
    published: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
}

impl MockBroker {
    pub fn new() -> (Self, BrokerHandle) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let state = Arc::new(BrokerState {
            incoming: Mutex::new(Some(incoming_rx)),
            published: Mutex::new(Some(published_tx)),
            ..BrokerState::default()
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            BrokerHandle {
                state,
                incoming: incoming_tx,
                published: published_rx,
            },
        )
    }
}

impl Broker for MockBroker {
    async fn connect(&self) -> Result<(), ApiError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), ApiError> {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .push(filter.to_owned());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ApiError> {
        let guard = self.state.published.lock().await;
        let tx = guard.as_ref().ok_or(ApiError::NotConnected)?;
        tx.send((topic.to_owned(), payload.to_vec()))
            .map_err(|_| ApiError::Disconnected)
    }

    async fn recv(&self) -> Result<BrokerMessage, ApiError> {
        let mut guard = self.state.incoming.lock().await;
        let rx = guard.as_mut().ok_or(ApiError::NotConnected)?;
        match rx.recv().await {
            Some(message) => message,
            None => std::future::pending().await,
        }
    }
}

impl BrokerHandle {
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.incoming
            .send(Ok(BrokerMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            }))
            .unwrap();
    }

    pub fn fail_session(&self) {
        self.incoming.send(Err(ApiError::Disconnected)).unwrap();
    }

    pub async fn next_publish(&mut self) -> (String, String) {
        let (topic, payload) = tokio::time::timeout(WAIT, self.published.recv())
            .await
            .expect("no publish within timeout")
            .expect("broker dropped");
        (topic, String::from_utf8(payload).unwrap())
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

// ── Registrar ───────────────────────────────────────────────────────

/// Records every call; answers from a script, then `Created`.
#[derive(Clone, Default)]
pub struct RecordingRegistrar {
    pub calls: Arc<std::sync::Mutex<Vec<String>>>,
    script: Arc<std::sync::Mutex<VecDeque<Result<Registration, ApiError>>>>,
}

impl RecordingRegistrar {
    pub fn with_script(script: Vec<Result<Registration, ApiError>>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(std::sync::Mutex::new(script.into())),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Registrar for RecordingRegistrar {
    async fn register(&self, device_id: &str) -> Result<Registration, ApiError> {
        self.calls.lock().unwrap().push(device_id.to_owned());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(Registration::Created))
    }
}
