//! Terminal dimensions.
//!
//! The browser terminal only runs at a handful of fixed geometries. Legacy
//! charsets use the narrow 40-column screen of the machines they come from.

use super::Charset;

/// A terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalSize {
    /// Screen width in columns.
    pub cols: u16,
    /// Screen height in rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Sizes a client may request.
    pub const ALLOWED: [TerminalSize; 4] = [
        TerminalSize::new(40, 24),
        TerminalSize::new(40, 25),
        TerminalSize::new(80, 25),
        TerminalSize::new(100, 31),
    ];

    /// Create a size.
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Standard 80x25 ANSI screen.
    pub const fn standard() -> Self {
        Self::new(80, 25)
    }

    /// 40x25 home-computer screen.
    pub const fn narrow() -> Self {
        Self::new(40, 25)
    }

    /// Whether a client may select this size.
    pub fn is_allowed(&self) -> bool {
        Self::ALLOWED.contains(self)
    }

    /// Size to use after switching to `charset`, given the current size.
    ///
    /// Legacy charsets always run at 40x25. Other charsets keep the current
    /// size when it is at least 80x25 and otherwise grow to 80x25.
    pub fn for_charset(self, charset: Charset) -> Self {
        if charset.is_legacy() {
            Self::narrow()
        } else if self.cols < 80 || self.rows < 25 {
            Self::standard()
        } else {
            self
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::standard()
    }
}
