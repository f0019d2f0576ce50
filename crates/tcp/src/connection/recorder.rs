//! Raw capture of the bytes read from a connection.
//!
//! The recorder is a side sink attached to the read path of a
//! [`Connection`](super::Connection). It never changes what the reader sees;
//! it only mirrors the bytes that a successful read returned.

use bytes::BytesMut;
use tracing::warn;

/// Default upper bound for a single capture cycle.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Initial capacity of a fresh capture buffer.
const INIT_RECORD_CAPACITY: usize = 64 * 1024;

/// The state of a connection's raw capture, as seen by callers.
///
/// `NotRecording` and `Discarded` are both "no raw data", but they mean
/// different things: the first is a configuration problem (nobody enabled
/// recording), the second means recording was on but the capture had to be
/// dropped (it grew past its limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawData<'a> {
    NotRecording,
    Discarded,
    Captured(&'a [u8]),
}

impl<'a> RawData<'a> {
    /// Returns the captured bytes, if any.
    #[inline]
    pub fn captured(self) -> Option<&'a [u8]> {
        match self {
            RawData::Captured(bytes) => Some(bytes),
            RawData::NotRecording | RawData::Discarded => None,
        }
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        !matches!(self, RawData::NotRecording)
    }
}

#[derive(Debug)]
pub(crate) struct Recorder {
    state: State,
    limit: usize,
}

#[derive(Debug)]
enum State {
    Disabled,
    Recording(BytesMut),
    Discarded,
}

impl Default for Recorder {
    fn default() -> Self {
        Self { state: State::Disabled, limit: DEFAULT_MAX_RECORD_SIZE }
    }
}

impl Recorder {
    /// Turns recording on. Bytes captured in the current cycle are kept.
    pub(crate) fn enable(&mut self) {
        if matches!(self.state, State::Disabled) {
            self.state = State::Recording(BytesMut::with_capacity(INIT_RECORD_CAPACITY.min(self.limit)));
        }
    }

    /// Turns recording off and drops everything captured so far.
    pub(crate) fn disable(&mut self) {
        self.state = State::Disabled;
    }

    /// Starts a new capture cycle, recording stays as it was.
    pub(crate) fn reset(&mut self) {
        if let State::Recording(buf) = &mut self.state {
            buf.clear();
        } else if matches!(self.state, State::Discarded) {
            self.state = State::Recording(BytesMut::with_capacity(INIT_RECORD_CAPACITY.min(self.limit)));
        }
    }

    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Appends the bytes returned by one successful read.
    ///
    /// A capture that would grow past the limit is dropped as a whole; the
    /// rest of the cycle is not recorded so callers never see partial data.
    pub(crate) fn record(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if let State::Recording(buf) = &mut self.state {
            if buf.len() + data.len() > self.limit {
                warn!(captured = buf.len(), incoming = data.len(), limit = self.limit, "raw capture exceeds limit, discarding");
                self.state = State::Discarded;
                return;
            }
            buf.extend_from_slice(data);
        }
    }

    pub(crate) fn raw_data(&self) -> RawData<'_> {
        match &self.state {
            State::Disabled => RawData::NotRecording,
            State::Recording(buf) => RawData::Captured(&buf[..]),
            State::Discarded => RawData::Discarded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let mut recorder = Recorder::default();
        recorder.record(b"hello");
        assert_eq!(recorder.raw_data(), RawData::NotRecording);
    }

    #[test]
    fn enable_is_idempotent() {
        let mut recorder = Recorder::default();
        recorder.enable();
        recorder.record(b"GET / ");
        recorder.enable();
        recorder.record(b"HTTP/1.1");
        assert_eq!(recorder.raw_data(), RawData::Captured(b"GET / HTTP/1.1"));
    }

    #[test]
    fn enabled_but_empty_is_not_not_recording() {
        let mut recorder = Recorder::default();
        recorder.enable();
        assert_eq!(recorder.raw_data(), RawData::Captured(b""));
        assert!(recorder.raw_data().is_recording());
    }

    #[test]
    fn disable_then_enable_keeps_only_second_cycle() {
        let mut recorder = Recorder::default();
        recorder.enable();
        recorder.record(b"first");
        recorder.disable();
        recorder.record(b"lost");
        recorder.enable();
        recorder.record(b"second");
        assert_eq!(recorder.raw_data().captured(), Some(&b"second"[..]));
    }

    #[test]
    fn overflow_discards_whole_cycle() {
        let mut recorder = Recorder::default();
        recorder.set_limit(8);
        recorder.enable();
        recorder.record(b"12345");
        recorder.record(b"6789");
        assert_eq!(recorder.raw_data(), RawData::Discarded);

        recorder.record(b"1");
        assert_eq!(recorder.raw_data(), RawData::Discarded);

        recorder.reset();
        recorder.record(b"abc");
        assert_eq!(recorder.raw_data(), RawData::Captured(b"abc"));
    }

    #[test]
    fn reset_keeps_recording_disabled() {
        let mut recorder = Recorder::default();
        recorder.reset();
        assert_eq!(recorder.raw_data(), RawData::NotRecording);
    }
}
