//! Streaming zlib decompression for gateway frames.
//!
//! With `compress` enabled the gateway sends every frame through one
//! long-lived zlib context. A logical message is complete when the
//! accumulated bytes end with the sync-flush suffix `00 00 FF FF`;
//! fragments before that boundary are buffered.

use flate2::{Decompress, FlushDecompress, Status};

/// Sync-flush suffix terminating a complete compressed message.
const SYNC_FLUSH_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Chunk size for growing the inflate output buffer.
const OUTPUT_CHUNK: usize = 16 * 1024;

/// Stateful inflater shared by all frames of one connection.
///
/// The zlib dictionary persists across messages, so a decode error leaves
/// the stream unusable; callers drop the connection on error rather than
/// attempting to continue.
pub struct ZlibInflater {
    input: Vec<u8>,
    output: Vec<u8>,
    stream: Decompress,
}

impl ZlibInflater {
    pub fn new() -> Self {
        Self {
            input: Vec::with_capacity(8 * 1024),
            output: Vec::with_capacity(2 * OUTPUT_CHUNK),
            stream: Decompress::new(true),
        }
    }

    /// Append a transport frame. Returns the inflated message when the
    /// sync-flush boundary has been reached, `None` while fragments are
    /// still accumulating.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<&[u8]>, std::io::Error> {
        self.input.extend_from_slice(data);

        if self.input.len() < 4 || self.input[self.input.len() - 4..] != SYNC_FLUSH_SUFFIX {
            return Ok(None);
        }

        self.inflate()?;
        self.input.clear();
        Ok(Some(&self.output))
    }

    fn inflate(&mut self) -> Result<(), std::io::Error> {
        self.output.clear();
        let mut consumed = 0usize;

        loop {
            let written_start = self.output.len();
            self.output.resize(written_start + OUTPUT_CHUNK, 0);

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();

            let status = self
                .stream
                .decompress(
                    &self.input[consumed..],
                    &mut self.output[written_start..],
                    FlushDecompress::Sync,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            consumed += (self.stream.total_in() - before_in) as usize;
            let written = (self.stream.total_out() - before_out) as usize;
            self.output.truncate(written_start + written);

            match status {
                Status::Ok if consumed >= self.input.len() => break,
                Status::Ok | Status::BufError => continue,
                Status::StreamEnd => break,
            }
        }

        Ok(())
    }

    /// Discard buffered state and the zlib context for a new connection.
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.stream.reset(true);
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Compress `data` with a sync flush, mirroring the transport format.
    fn deflate_sync(compressor: &mut Compress, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 64);
        let before = compressor.total_out();
        out.resize(data.len() + 256, 0);
        compressor
            .compress(data, &mut out, FlushCompress::Sync)
            .unwrap();
        out.truncate((compressor.total_out() - before) as usize);
        out
    }

    #[test]
    fn inflates_a_complete_message() {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut inflater = ZlibInflater::new();

        let msg = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let frame = deflate_sync(&mut compressor, msg);
        assert_eq!(&frame[frame.len() - 4..], &SYNC_FLUSH_SUFFIX);

        let out = inflater.push(&frame).unwrap().expect("complete message");
        assert_eq!(out, msg);
    }

    #[test]
    fn buffers_fragments_until_suffix() {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut inflater = ZlibInflater::new();

        let msg = br#"{"op":11,"d":null}"#;
        let frame = deflate_sync(&mut compressor, msg);
        let (a, b) = frame.split_at(frame.len() / 2);

        assert!(inflater.push(a).unwrap().is_none());
        let out = inflater.push(b).unwrap().expect("complete after tail");
        assert_eq!(out, msg);
    }

    #[test]
    fn shares_context_across_messages() {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut inflater = ZlibInflater::new();

        let first = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let second = br#"{"op":0,"s":1,"t":"READY","d":{"v":6}}"#;

        let f1 = deflate_sync(&mut compressor, first);
        let out1 = inflater.push(&f1).unwrap().unwrap().to_vec();
        assert_eq!(out1, first);

        let f2 = deflate_sync(&mut compressor, second);
        let out2 = inflater.push(&f2).unwrap().unwrap();
        assert_eq!(out2, second);
    }

    #[test]
    fn reset_clears_buffers() {
        let mut inflater = ZlibInflater::new();
        let _ = inflater.push(b"garbage");
        inflater.reset();
        assert!(inflater.input.is_empty());
    }
}
