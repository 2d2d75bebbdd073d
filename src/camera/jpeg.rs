use bytes::{Buf, Bytes, BytesMut};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Cuts whole JPEG images out of an MJPEG byte stream (multipart or bare
/// concatenation). When one chunk completes several images only the newest
/// is returned.
#[derive(Debug)]
pub struct JpegFrameAccumulator {
    buffer: BytesMut,
    max_buffered: usize,
}

impl JpegFrameAccumulator {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_BYTES)
    }

    pub fn with_limit(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.max_buffered {
            let overflow = self.buffer.len() - self.max_buffered;
            self.buffer.advance(overflow);
        }

        let mut latest_frame = None;
        loop {
            let Some(start) = find_marker(&self.buffer, &JPEG_SOI) else {
                // A trailing 0xFF may be the first half of the next SOI.
                let keep = usize::from(self.buffer.last() == Some(&JPEG_SOI[0]));
                let discard = self.buffer.len() - keep;
                self.buffer.advance(discard);
                break;
            };
            self.buffer.advance(start);

            let Some(end_rel) = find_marker(&self.buffer[2..], &JPEG_EOI) else {
                break;
            };

            let end = 2 + end_rel + 2;
            latest_frame = Some(self.buffer.split_to(end).freeze());
        }

        latest_frame
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for JpegFrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}
