//! Delimiter framer for the Lumagen line protocol.
//!
//! Wire format (Delimiters: On):
//! ```text
//! <ascii text>\r[\n]
//! ```
//! Every message ends in a carriage return.  The device may follow the
//! carriage return with a linefeed; when `suppress_trailing_lf` is set that
//! single linefeed is swallowed instead of leaking into the next frame.
//!
//! # Why a state machine? (for beginners)
//!
//! TCP is a *stream* protocol.  One `read()` can return half a message, three
//! messages, or the tail of one message glued to the head of the next.  The
//! framer therefore keeps everything it has not yet emitted and walks the
//! input one byte at a time.  Because every decision depends only on the
//! current byte and the framer's own state, the frames produced for a given
//! byte stream are the same no matter how that stream was chopped into reads.
//!
//! # Laziness
//!
//! [`Framer::feed`] only buffers.  Frames are produced on demand by
//! [`Framer::next_frame`] (or the [`Framer::frames`] iterator), so the caller
//! can stop pulling at any point and resume later without losing bytes.

use thiserror::Error;

/// Default carriage-return terminator.
pub const DEFAULT_TERMINATOR: u8 = b'\r';

/// Default cap on a single frame, in bytes (terminator excluded).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// Errors signalled by the framer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// No delimiter arrived within the configured cap; the partial frame was
    /// discarded and the rest of the line will be skipped.
    #[error("frame exceeded {max} bytes without a delimiter; {discarded} bytes discarded")]
    Overflow { max: usize, discarded: usize },
}

/// Framer settings, mirroring the device's "Delimiters" configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerConfig {
    /// Byte that ends a frame.
    pub terminator: u8,
    /// Swallow one `\n` directly following a terminator.
    pub suppress_trailing_lf: bool,
    /// Maximum frame length before the partial buffer is discarded.
    pub max_frame_len: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            suppress_trailing_lf: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// One complete message as received, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
}

impl RawFrame {
    /// Wraps already-delimited bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The frame body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame and returns its body.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Streaming framer.  See the module docs for the wire format.
#[derive(Debug)]
pub struct Framer {
    config: FramerConfig,
    /// Bytes fed but not yet scanned.
    input: Vec<u8>,
    /// Read position inside `input`.
    cursor: usize,
    /// Body of the frame currently being assembled.
    current: Vec<u8>,
    /// The previous byte was a terminator and the next `\n` must be dropped.
    skip_lf: bool,
    /// An overflow was reported; drop bytes until the next terminator.
    discarding: bool,
}

impl Framer {
    /// Creates a framer with the given settings.
    pub fn new(config: FramerConfig) -> Self {
        Self {
            config,
            input: Vec::with_capacity(256),
            cursor: 0,
            current: Vec::with_capacity(64),
            skip_lf: false,
            discarding: false,
        }
    }

    /// Settings this framer was built with.
    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Buffers raw transport bytes.  No frames are produced until pulled.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    /// Number of bytes held in the partially assembled frame.
    pub fn partial_len(&self) -> usize {
        self.current.len()
    }

    /// Drops all buffered state, e.g. after the transport reconnects.
    pub fn reset(&mut self) {
        self.input.clear();
        self.cursor = 0;
        self.current.clear();
        self.skip_lf = false;
        self.discarding = false;
    }

    /// Pulls the next complete frame, or `None` once the fed bytes are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Yields [`FramingError::Overflow`] once per overlong line.  Framing
    /// continues normally after the next terminator.
    pub fn next_frame(&mut self) -> Option<Result<RawFrame, FramingError>> {
        while let Some(&byte) = self.input.get(self.cursor) {
            self.cursor += 1;

            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }

            if byte == self.config.terminator {
                self.skip_lf = self.config.suppress_trailing_lf;
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                if self.current.is_empty() {
                    // Zero-length frames carry nothing.
                    continue;
                }
                let body = std::mem::take(&mut self.current);
                return Some(Ok(RawFrame::new(body)));
            }

            if self.discarding {
                continue;
            }

            if self.current.len() >= self.config.max_frame_len {
                let discarded = self.current.len() + 1;
                self.current.clear();
                self.discarding = true;
                return Some(Err(FramingError::Overflow {
                    max: self.config.max_frame_len,
                    discarded,
                }));
            }

            self.current.push(byte);
        }

        self.input.clear();
        self.cursor = 0;
        None
    }

    /// Iterator over the frames currently extractable from the buffer.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(FramerConfig::default())
    }
}

/// Lazy iterator returned by [`Framer::frames`].
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Frames<'_> {
    type Item = Result<RawFrame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut Framer) -> Vec<Result<Vec<u8>, FramingError>> {
        framer.frames().map(|r| r.map(RawFrame::into_bytes)).collect()
    }

    #[test]
    fn test_single_frame_is_emitted_without_terminator() {
        // Arrange
        let mut framer = Framer::default();

        // Act
        framer.feed(b"Z1Active\r");
        let frames = collect(&mut framer);

        // Assert
        assert_eq!(frames, vec![Ok(b"Z1Active".to_vec())]);
    }

    #[test]
    fn test_frame_split_across_two_feeds() {
        let mut framer = Framer::default();

        framer.feed(b"!S02");
        assert!(framer.next_frame().is_none(), "no terminator yet");
        assert_eq!(framer.partial_len(), 4);

        framer.feed(b",1\r\n");
        let frames = collect(&mut framer);

        assert_eq!(frames, vec![Ok(b"!S02,1".to_vec())]);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut framer = Framer::default();

        framer.feed(b"Z1\r\nZ1Warming\r\nZ1Active\r\n");
        let frames = collect(&mut framer);

        assert_eq!(
            frames,
            vec![
                Ok(b"Z1".to_vec()),
                Ok(b"Z1Warming".to_vec()),
                Ok(b"Z1Active".to_vec()),
            ]
        );
    }

    #[test]
    fn test_zero_length_frames_are_ignored() {
        let mut framer = Framer::default();

        framer.feed(b"\r\r\n\rZ0\r");

        assert_eq!(collect(&mut framer), vec![Ok(b"Z0".to_vec())]);
    }

    #[test]
    fn test_linefeed_kept_when_suppression_disabled() {
        // Arrange: the LF is not swallowed, so it leads the next frame.
        let mut framer = Framer::new(FramerConfig {
            suppress_trailing_lf: false,
            ..FramerConfig::default()
        });

        // Act
        framer.feed(b"a\r\nb\r");

        // Assert
        assert_eq!(
            collect(&mut framer),
            vec![Ok(b"a".to_vec()), Ok(b"\nb".to_vec())]
        );
    }

    #[test]
    fn test_only_one_linefeed_is_suppressed() {
        let mut framer = Framer::default();

        framer.feed(b"a\r\n\nb\r");

        assert_eq!(
            collect(&mut framer),
            vec![Ok(b"a".to_vec()), Ok(b"\nb".to_vec())]
        );
    }

    #[test]
    fn test_linefeed_suppression_survives_chunk_boundary() {
        let mut framer = Framer::default();

        framer.feed(b"a\r");
        let first = collect(&mut framer);
        framer.feed(b"\nb\r");
        let second = collect(&mut framer);

        assert_eq!(first, vec![Ok(b"a".to_vec())]);
        assert_eq!(second, vec![Ok(b"b".to_vec())]);
    }

    #[test]
    fn test_overflow_discards_partial_and_resumes_after_next_terminator() {
        // Arrange
        let mut framer = Framer::new(FramerConfig {
            max_frame_len: 4,
            ..FramerConfig::default()
        });

        // Act: 7 bytes without a delimiter, then a normal frame
        framer.feed(b"abcdefg\rok\r");
        let frames = collect(&mut framer);

        // Assert: one overflow, the tail "fg" is skipped, "ok" survives
        assert_eq!(
            frames,
            vec![
                Err(FramingError::Overflow {
                    max: 4,
                    discarded: 5
                }),
                Ok(b"ok".to_vec()),
            ]
        );
    }

    #[test]
    fn test_frame_exactly_at_cap_is_accepted() {
        let mut framer = Framer::new(FramerConfig {
            max_frame_len: 4,
            ..FramerConfig::default()
        });

        framer.feed(b"abcd\r");

        assert_eq!(collect(&mut framer), vec![Ok(b"abcd".to_vec())]);
    }

    #[test]
    fn test_overflow_reported_once_per_line_across_feeds() {
        let mut framer = Framer::new(FramerConfig {
            max_frame_len: 2,
            ..FramerConfig::default()
        });

        framer.feed(b"xyz");
        let first = collect(&mut framer);
        framer.feed(b"zzzzzz");
        let second = collect(&mut framer);
        framer.feed(b"\rZ1\r");
        let third = collect(&mut framer);

        assert_eq!(first.len(), 1);
        assert!(first[0].is_err());
        assert!(second.is_empty(), "the rest of the line is skipped silently");
        assert_eq!(third, vec![Ok(b"Z1".to_vec())]);
    }

    #[test]
    fn test_iteration_can_stop_and_resume() {
        let mut framer = Framer::default();
        framer.feed(b"one\rtwo\rthree\r");

        let first = framer.next_frame();
        framer.feed(b"four\r");
        let rest = collect(&mut framer);

        assert_eq!(first, Some(Ok(RawFrame::new(b"one".to_vec()))));
        assert_eq!(
            rest,
            vec![
                Ok(b"two".to_vec()),
                Ok(b"three".to_vec()),
                Ok(b"four".to_vec()),
            ]
        );
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut framer = Framer::default();
        framer.feed(b"stale");
        let _ = collect(&mut framer);

        framer.reset();
        framer.feed(b"fresh\r");

        assert_eq!(collect(&mut framer), vec![Ok(b"fresh".to_vec())]);
    }
}
