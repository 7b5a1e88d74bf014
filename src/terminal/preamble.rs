//! Legacy preamble buffering.
//!
//! Right after connecting (or switching to a legacy charset) a BBS often
//! sends negotiation noise and text meant for a different terminal before
//! it clears the screen. The preamble buffer withholds that output until a
//! clear or home code shows up, a time limit passes, or a size limit is
//! reached, and then releases everything at once.

use std::time::{Duration, Instant};

use super::legacy::contains_screen_reset;
use super::Charset;

/// Withholds legacy output until the screen is synchronized.
#[derive(Debug)]
pub struct Preamble {
    armed_at: Option<Instant>,
    buffer: Vec<u8>,
    timeout: Duration,
    max_bytes: usize,
}

impl Preamble {
    /// Create a disarmed preamble buffer.
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self {
            armed_at: None,
            buffer: Vec::new(),
            timeout,
            max_bytes,
        }
    }

    /// Start withholding output.
    pub fn arm(&mut self, now: Instant) {
        self.armed_at = Some(now);
        self.buffer.clear();
    }

    /// Stop withholding output, returning anything held.
    pub fn disarm(&mut self) -> Vec<u8> {
        self.armed_at = None;
        std::mem::take(&mut self.buffer)
    }

    /// Whether output is being withheld.
    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Time limit for withholding.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When withheld output will be released by the time limit.
    pub fn deadline(&self) -> Option<Instant> {
        self.armed_at.map(|armed_at| armed_at + self.timeout)
    }

    /// Submit a chunk. Returns the bytes to display now, or `None` if the
    /// chunk was withheld.
    pub fn offer(&mut self, chunk: &[u8], charset: Charset, now: Instant) -> Option<Vec<u8>> {
        let Some(armed_at) = self.armed_at else {
            return Some(chunk.to_vec());
        };

        let release = contains_screen_reset(chunk, charset)
            || now.duration_since(armed_at) > self.timeout
            || self.buffer.len() + chunk.len() > self.max_bytes;

        self.buffer.extend_from_slice(chunk);
        if release {
            Some(self.disarm())
        } else {
            None
        }
    }

    /// Release withheld bytes if the time limit has passed.
    pub fn expire(&mut self, now: Instant) -> Option<Vec<u8>> {
        let armed_at = self.armed_at?;
        if now.duration_since(armed_at) >= self.timeout {
            Some(self.disarm())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble() -> Preamble {
        Preamble::new(Duration::from_millis(1500), 8192)
    }

    #[test]
    fn test_disarmed_passes_through() {
        let mut p = preamble();
        let now = Instant::now();
        assert_eq!(p.offer(b"abc", Charset::PetsciiUpper, now), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_withholds_until_clear_screen() {
        let mut p = preamble();
        let now = Instant::now();
        p.arm(now);
        assert_eq!(p.offer(b"noise", Charset::PetsciiUpper, now), None);
        assert_eq!(
            p.offer(&[0x93, b'A'], Charset::PetsciiUpper, now),
            Some(vec![b'n', b'o', b'i', b's', b'e', 0x93, b'A'])
        );
        assert!(!p.is_armed());
    }

    #[test]
    fn test_atascii_clear_releases() {
        let mut p = preamble();
        let now = Instant::now();
        p.arm(now);
        assert!(p.offer(&[0x7D], Charset::Atascii, now).is_some());
    }

    #[test]
    fn test_timeout_releases() {
        let mut p = preamble();
        let start = Instant::now();
        p.arm(start);
        assert_eq!(p.offer(b"a", Charset::PetsciiUpper, start), None);
        let later = start + Duration::from_millis(1600);
        assert_eq!(p.offer(b"b", Charset::PetsciiUpper, later), Some(b"ab".to_vec()));
    }

    #[test]
    fn test_size_limit_releases() {
        let mut p = Preamble::new(Duration::from_secs(10), 4);
        let now = Instant::now();
        p.arm(now);
        assert_eq!(p.offer(b"abc", Charset::Atascii, now), None);
        assert_eq!(p.offer(b"de", Charset::Atascii, now), Some(b"abcde".to_vec()));
    }

    #[test]
    fn test_expire() {
        let mut p = preamble();
        let start = Instant::now();
        p.arm(start);
        p.offer(b"held", Charset::PetsciiLower, start);
        assert_eq!(p.deadline(), Some(start + Duration::from_millis(1500)));
        assert_eq!(p.expire(start + Duration::from_millis(100)), None);
        assert_eq!(
            p.expire(start + Duration::from_millis(1500)),
            Some(b"held".to_vec())
        );
        assert_eq!(p.expire(start + Duration::from_secs(5)), None);
    }
}
