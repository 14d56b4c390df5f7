//! In-process stand-in for a Lumagen behind an IP2SL.
//!
//! Listens on an ephemeral loopback port and speaks the text protocol: echoes
//! commands, answers the status and label queries, and lets a test push
//! arbitrary frames, go silent or drop the connection.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lumagen_client::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const IDENTITY: &str = "!S01,RadiancePro,090524,1018,009022";

/// How the fake device behaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Repeat each command back.
    pub echo: bool,
    /// Answer ZQS00/01/02 and the ZQS1A label queries.
    pub answer_queries: bool,
    /// Pause before echoing.
    pub echo_delay: Duration,
    /// After echoing `Z1`, report Warming, then Active after this delay.
    pub power_on_sequence: Option<Duration>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            echo: true,
            answer_queries: true,
            echo_delay: Duration::ZERO,
            power_on_sequence: None,
        }
    }
}

enum Action {
    Send(Vec<u8>),
    Drop,
}

/// Handle to the running fake device.
pub struct MockDevice {
    pub addr: SocketAddr,
    actions: mpsc::UnboundedSender<Action>,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
    power_on: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
}

impl MockDevice {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let power_on = Arc::new(AtomicBool::new(false));
        let silent = Arc::new(AtomicBool::new(false));

        let device = Self {
            addr,
            actions: tx,
            received: Arc::clone(&received),
            accepted: Arc::clone(&accepted),
            overlapped: Arc::clone(&overlapped),
            power_on: Arc::clone(&power_on),
            silent: Arc::clone(&silent),
        };

        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let session = Session {
                    behavior: behavior.clone(),
                    received: Arc::clone(&received),
                    overlapped: Arc::clone(&overlapped),
                    power_on: Arc::clone(&power_on),
                    silent: Arc::clone(&silent),
                };
                session.serve(sock, &mut rx).await;
            }
        });

        device
    }

    /// Client settings with short timeouts, pointed at this device.
    pub fn config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::for_bridge("127.0.0.1", self.addr.port());
        cfg.connection.connect_timeout_ms = 1_000;
        cfg.connection.backoff_initial_ms = 100;
        cfg.connection.backoff_max_ms = 400;
        cfg.connection.probe_interval_ms = 60_000;
        cfg.commands.echo_timeout_ms = 300;
        cfg.commands.response_timeout_ms = 500;
        cfg.commands.max_retries = 0;
        cfg
    }

    /// Writes raw bytes to the connected client.
    pub fn push(&self, bytes: &[u8]) {
        let _ = self.actions.send(Action::Send(bytes.to_vec()));
    }

    /// Closes the current connection.
    pub fn drop_connection(&self) {
        let _ = self.actions.send(Action::Drop);
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Received commands other than the status and label queries.
    pub fn commands(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|c| !c.starts_with("ZQS"))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Whether a command ever arrived before the previous one was echoed.
    pub fn saw_overlap(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn set_power(&self, on: bool) {
        self.power_on.store(on, Ordering::SeqCst);
    }

    /// Stops echoing and answering, while still recording what arrives.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

/// Label the fake reports for input `n`.
pub fn label_for(n: u8) -> String {
    format!("Source {n}")
}

/// Answer to `ZQS1A<code>`, with inputs coded `0`..`9` then `A`..`H`.
fn label_answer(code: &str) -> Option<String> {
    let c = code.chars().next()?;
    let n = match c {
        '0'..='9' => c as u8 - b'0' + 1,
        'A'..='H' => c as u8 - b'A' + 11,
        _ => return None,
    };
    Some(format!("!S1A{c},{}", label_for(n)))
}

struct Session {
    behavior: Behavior,
    received: Arc<Mutex<Vec<String>>>,
    overlapped: Arc<AtomicBool>,
    power_on: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
}

impl Session {
    async fn serve(&self, mut sock: TcpStream, actions: &mut mpsc::UnboundedReceiver<Action>) {
        let mut pending = Vec::new();
        let mut buf = [0u8; 512];

        loop {
            tokio::select! {
                read = sock.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    pending.extend_from_slice(&buf[..n]);
                    let mut commands = Vec::new();
                    while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line[..line.len() - 1]);
                        commands.push(text.into_owned());
                    }
                    if commands.len() > 1 {
                        self.overlapped.store(true, Ordering::SeqCst);
                    }
                    for cmd in commands {
                        if self.handle(&mut sock, &cmd).await.is_err() {
                            return;
                        }
                    }
                }
                action = actions.recv() => {
                    match action {
                        Some(Action::Send(bytes)) => {
                            if sock.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        Some(Action::Drop) | None => return,
                    }
                }
            }
        }
    }

    async fn handle(&self, sock: &mut TcpStream, cmd: &str) -> std::io::Result<()> {
        self.received.lock().unwrap().push(cmd.to_string());
        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.behavior.echo {
            tokio::time::sleep(self.behavior.echo_delay).await;
            sock.write_all(format!("{cmd}\r\n").as_bytes()).await?;
        }

        if self.behavior.answer_queries {
            let answer = match cmd {
                "ZQS00" => Some("!S00,Ok".to_string()),
                "ZQS01" => Some(IDENTITY.to_string()),
                "ZQS02" => Some(format!(
                    "!S02,{}",
                    u8::from(self.power_on.load(Ordering::SeqCst))
                )),
                _ => cmd.strip_prefix("ZQS1A").and_then(label_answer),
            };
            if let Some(answer) = answer {
                sock.write_all(format!("{answer}\r\n").as_bytes()).await?;
            }
        }

        if cmd == "Z1" {
            if let Some(delay) = self.behavior.power_on_sequence {
                self.power_on.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                sock.write_all(b"Z1Warming\r\n").await?;
                tokio::time::sleep(delay).await;
                sock.write_all(b"Z1Active\r\n").await?;
            }
        }
        Ok(())
    }
}
