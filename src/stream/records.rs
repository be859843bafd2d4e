//! Newline-delimited record reassembly for the upstream event stream.
//!
//! Network reads arrive in arbitrary sizes: one read may carry many records,
//! and a single record may be split across several reads (mid-prefix,
//! mid-JSON, even mid-UTF-8 sequence). [`RecordBuffer`] splits on raw bytes,
//! so nothing is decoded until a record is complete.
use bytes::{Bytes, BytesMut};
use memchr::memchr;

const RECORD_SEPARATOR: u8 = b'\n';

/// Holds the bytes of the trailing record that has not been terminated yet.
///
/// After every [`feed_into`](Self::feed_into) the buffer contains no
/// separator: each complete record has already been handed out.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    partial: BytesMut,
}

impl RecordBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one upstream read and push every record it completes into
    /// `out`, in arrival order. Records are yielded without the separator.
    pub fn feed_into<E: Extend<Bytes>>(&mut self, chunk: &[u8], out: &mut E) {
        // The retained tail never holds a separator, so only new bytes need scanning.
        let mut scan_from = self.partial.len();
        self.partial.extend_from_slice(chunk);

        while let Some(rel_pos) = memchr(RECORD_SEPARATOR, &self.partial[scan_from..]) {
            let end = scan_from + rel_pos;
            let mut record = self.partial.split_to(end + 1);
            record.truncate(end);
            out.extend(std::iter::once(record.freeze()));
            scan_from = 0;
        }
    }

    /// Number of bytes buffered since the last separator.
    #[must_use]
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Drop the unterminated tail without parsing it, returning its length.
    pub fn discard_partial(&mut self) -> usize {
        let len = self.partial.len();
        self.partial.clear();
        len
    }
}
