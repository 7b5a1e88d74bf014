//! Terminal display module.
//!
//! Everything between telnet-clean remote bytes and the UTF-8 stream the
//! browser terminal renders: charsets and glyph tables, legacy control
//! translation, ANSI normalization, music extraction, query answers and
//! the per-session [`DisplayPipeline`] that ties them together.

mod ansi;
mod charset;
mod cursor;
mod legacy;
mod music;
mod pipeline;
mod preamble;
mod profile;
mod tables;

pub use ansi::{normalize_sgr_case, AnsiNormalizer, Fed, MAX_SEQUENCE_LEN};
pub use charset::{from_unicode, is_plain_ascii, to_unicode, Charset, PLACEHOLDER_BYTE};
pub use cursor::{find_queries, CursorTracker, Query};
pub use legacy::{
    contains_screen_reset, encode_input, translate, translate_continuing, Segment, Translation,
    MAX_CONSECUTIVE_CR,
};
pub use music::{MusicExtractor, MAX_MUSIC_LEN};
pub use pipeline::{CharsetSwitch, DisplayOutput, DisplayPipeline, PipelineOptions};
pub use preamble::Preamble;
pub use profile::TerminalSize;
