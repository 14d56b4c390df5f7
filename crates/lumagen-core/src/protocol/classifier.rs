//! Sorts complete frames into echoes, responses, reports and noise.
//!
//! # Sorting one shared stream (for beginners)
//!
//! The device speaks on a single byte stream.  With echo enabled it repeats
//! every command it receives, answers queries with `!Sxx,...` lines, and
//! interleaves unsolicited reports whenever its state changes.  None of these
//! lines carry a request id, so the only way to tell them apart is to remember
//! what we last sent and what answer we are waiting for.
//!
//! Rules, in priority order:
//!
//! 1. The frame equals the last command text sent → **Echo**.
//! 2. The frame starts with a report prefix → **UnsolicitedReport**.  A
//!    report prefix with a broken body becomes **Unknown**.
//! 3. A query is pending and the frame starts with its response prefix →
//!    **Response**.
//! 4. Anything else → **Unknown**.
//!
//! The classifier never fails; bad input is always Unknown.

use std::time::Instant;

use tracing::{debug, warn};

use crate::protocol::framer::RawFrame;
use crate::protocol::reports::{parse_report, Report};

/// Category of a classified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Exact repeat of the last command sent.
    Echo,
    /// Answer to the pending query.
    Response,
    /// State change pushed by the device.
    UnsolicitedReport(Report),
    /// Nothing we recognise.
    Unknown,
}

/// A frame together with its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMessage {
    pub kind: MessageKind,
    /// Frame text; invalid UTF-8 is replaced lossily.
    pub payload: String,
    pub received_at: Instant,
}

/// Stateful frame classifier.
///
/// Owned by the dispatcher, which arms it before each write.
#[derive(Debug, Default)]
pub struct Classifier {
    /// Text of the last command written.  Kept after the command resolves so
    /// a late echo is still recognised.
    last_sent: Option<String>,
    /// Response prefix the pending query waits for.
    expected_response: Option<&'static str>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a command about to be written.
    pub fn arm(&mut self, sent_text: &str, expected_response: Option<&'static str>) {
        self.last_sent = Some(sent_text.to_string());
        self.expected_response = expected_response;
    }

    /// Stops matching responses.  Called when the pending command resolves.
    pub fn clear_expectation(&mut self) {
        self.expected_response = None;
    }

    /// Forgets everything; used when the connection drops.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.expected_response = None;
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    pub fn expected_response(&self) -> Option<&'static str> {
        self.expected_response
    }

    /// Classifies one frame.
    pub fn classify(&self, frame: &RawFrame) -> ClassifiedMessage {
        let received_at = Instant::now();
        let payload = String::from_utf8_lossy(frame.as_bytes()).into_owned();
        let kind = self.kind_of(&payload);
        ClassifiedMessage {
            kind,
            payload,
            received_at,
        }
    }

    fn kind_of(&self, text: &str) -> MessageKind {
        if self.last_sent.as_deref() == Some(text) {
            return MessageKind::Echo;
        }

        match parse_report(text) {
            Some(Ok(report)) => return MessageKind::UnsolicitedReport(report),
            Some(Err(e)) => {
                warn!(frame = %text, error = %e, "malformed report");
                return MessageKind::Unknown;
            }
            None => {}
        }

        if let Some(prefix) = self.expected_response {
            if text.starts_with(prefix) {
                return MessageKind::Response;
            }
        }

        debug!(frame = %text, "unclassified frame");
        MessageKind::Unknown
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
