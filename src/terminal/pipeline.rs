//! Per-chunk display pipeline.
//!
//! Takes telnet-clean remote bytes that the transfer bridge did not claim
//! and turns them into UTF-8 terminal output:
//!
//! 1. music extraction (ANSI charsets)
//! 2. ANSI normalization and query answers (ANSI charsets)
//! 3. preamble buffering (legacy charsets)
//! 4. legacy control translation
//! 5. charset conversion, with the plain-ASCII bypass for legacy charsets
//! 6. a final ambiguous-SGR pass

use std::time::{Duration, Instant};

use tracing::debug;

use super::ansi::{normalize_sgr_case, AnsiNormalizer};
use super::charset::{is_plain_ascii, to_unicode};
use super::cursor::{find_queries, CursorTracker, Query};
use super::legacy::{contains_screen_reset, translate_continuing, Segment};
use super::music::MusicExtractor;
use super::preamble::Preamble;
use super::{Charset, TerminalSize};
use crate::config::TerminalConfig;

/// Tunables for the display pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Printable percentage for the plain-ASCII bypass.
    pub bypass_threshold: u8,
    /// Answer status and attribute queries.
    pub answer_queries: bool,
    /// Track the cursor for position reports.
    pub track_cursor: bool,
    /// Preamble time limit.
    pub preamble_timeout: Duration,
    /// Preamble size limit.
    pub preamble_max_bytes: usize,
}

impl From<&TerminalConfig> for PipelineOptions {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            bypass_threshold: config.ascii_bypass_threshold,
            answer_queries: config.answer_queries,
            track_cursor: config.track_cursor,
            preamble_timeout: Duration::from_millis(config.preamble_timeout_ms),
            preamble_max_bytes: config.preamble_max_bytes,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&TerminalConfig::default())
    }
}

/// Result of running one chunk through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayOutput {
    /// UTF-8 bytes for the browser terminal.
    pub display: Vec<u8>,
    /// Extracted ANSI music strings.
    pub music: Vec<String>,
    /// Query answers to send to the remote.
    pub replies: Vec<u8>,
    /// Set when an in-band control code changed the charset.
    pub charset_changed: Option<Charset>,
}

/// Outcome of a charset switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharsetSwitch {
    /// Terminal size after the switch.
    pub size: TerminalSize,
    /// Whether the size changed.
    pub size_changed: bool,
}

/// Display state for one session.
#[derive(Debug)]
pub struct DisplayPipeline {
    charset: Charset,
    size: TerminalSize,
    options: PipelineOptions,
    normalizer: AnsiNormalizer,
    music: MusicExtractor,
    cursor: CursorTracker,
    preamble: Preamble,
    /// Carriage returns at the end of the last legacy chunk.
    pending_crs: usize,
}

impl DisplayPipeline {
    /// Create a pipeline for `charset`, arming the preamble for legacy charsets.
    pub fn new(charset: Charset, options: PipelineOptions, now: Instant) -> Self {
        let size = TerminalSize::default();
        let preamble = Preamble::new(options.preamble_timeout, options.preamble_max_bytes);
        let mut pipeline = Self {
            charset,
            size,
            normalizer: AnsiNormalizer::new(),
            music: MusicExtractor::new(),
            cursor: CursorTracker::new(size),
            preamble,
            options,
            pending_crs: 0,
        };
        pipeline.set_charset(charset, now);
        pipeline
    }

    /// Active charset.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    /// Whether output is currently withheld by the preamble.
    pub fn preamble_armed(&self) -> bool {
        self.preamble.is_armed()
    }

    /// Preamble time limit.
    pub fn preamble_timeout(&self) -> Duration {
        self.preamble.timeout()
    }

    /// When the preamble time limit runs out, if armed.
    pub fn preamble_deadline(&self) -> Option<Instant> {
        self.preamble.deadline()
    }

    /// Switch charset on client request.
    ///
    /// Legacy charsets arm the preamble and use the narrow screen. Other
    /// charsets drop any withheld preamble and use at least 80x25.
    pub fn set_charset(&mut self, charset: Charset, now: Instant) -> CharsetSwitch {
        self.charset = charset;
        self.pending_crs = 0;
        self.normalizer.set_promote_c1(charset != Charset::Utf8);

        if charset.is_legacy() {
            self.preamble.arm(now);
        } else {
            let dropped = self.preamble.disarm();
            if !dropped.is_empty() {
                debug!("Discarding {} bytes of legacy preamble", dropped.len());
            }
        }

        let size = self.size.for_charset(charset);
        let size_changed = size != self.size;
        self.resize(size);
        CharsetSwitch { size, size_changed }
    }

    /// Change the terminal size.
    pub fn resize(&mut self, size: TerminalSize) {
        self.size = size;
        self.cursor.set_size(size);
    }

    /// Run a clean chunk through the pipeline.
    pub fn process(&mut self, clean: &[u8], now: Instant) -> DisplayOutput {
        let mut out = DisplayOutput::default();

        let data = if self.charset.is_legacy() {
            clean.to_vec()
        } else {
            let (data, music) = self.music.extract(clean);
            out.music = music;
            // Normalized output only holds whole sequences, so a query split
            // between chunks is seen once it completes.
            let normalized = self.normalizer.feed(&data).output;
            if self.options.answer_queries {
                self.answer_queries(&normalized, &mut out.replies);
            }
            normalized
        };

        if let Some(data) = self.preamble.offer(&data, self.charset, now) {
            self.render(&data, &mut out, now);
        }
        out
    }

    /// Release the preamble if its time limit has passed.
    pub fn expire_preamble(&mut self, now: Instant) -> Option<DisplayOutput> {
        let data = self.preamble.expire(now)?;
        let mut out = DisplayOutput::default();
        self.render(&data, &mut out, now);
        Some(out)
    }

    fn answer_queries(&self, data: &[u8], replies: &mut Vec<u8>) {
        for query in find_queries(data) {
            if query == Query::CursorPosition && !self.options.track_cursor {
                continue;
            }
            replies.extend(self.cursor.reply(query));
        }
    }

    fn render(&mut self, data: &[u8], out: &mut DisplayOutput, now: Instant) {
        if data.is_empty() {
            return;
        }

        let converted = match self.charset {
            Charset::Cp437 => {
                self.track(data);
                to_unicode(data, Charset::Cp437).into_bytes()
            }
            Charset::Utf8 => {
                self.track(data);
                data.to_vec()
            }
            Charset::PetsciiUpper | Charset::PetsciiLower | Charset::Atascii => {
                let bypass = is_plain_ascii(data, self.options.bypass_threshold);
                let translation = translate_continuing(data, self.charset, self.pending_crs);
                self.pending_crs = translation.trailing_crs;
                if translation.charset != self.charset {
                    debug!("In-band charset switch to {}", translation.charset);
                    self.charset = translation.charset;
                    out.charset_changed = Some(translation.charset);
                    self.arm_after_switch(data, translation.switched_at, now);
                }

                let mut bytes = Vec::with_capacity(data.len() * 2);
                for segment in translation.segments {
                    match segment {
                        Segment::Control(control) => bytes.extend(control),
                        Segment::Text { bytes: text, .. } if bypass => bytes.extend(text),
                        Segment::Text { charset, bytes: text } => {
                            bytes.extend(to_unicode(&text, charset).into_bytes())
                        }
                    }
                }
                bytes
            }
        };

        out.display.extend(normalize_sgr_case(&converted));
    }

    /// Withhold output after an in-band switch until the screen is reset,
    /// unless the rest of the switching chunk already reset it.
    fn arm_after_switch(&mut self, data: &[u8], switched_at: Option<usize>, now: Instant) {
        let rest = switched_at.map_or(data, |at| &data[at + 1..]);
        if !contains_screen_reset(rest, self.charset) {
            self.preamble.arm(now);
        }
    }

    fn track(&mut self, data: &[u8]) {
        if self.options.track_cursor {
            self.cursor.update(data);
        }
    }
}
