//! Bounds-checked body reader.

/// Big Endian cursor over an untrusted response body.
///
/// Every accessor returns `None` once the body is exhausted, leaving the
/// cursor where it was.
#[derive(Debug, Clone)]
pub struct BodyReader<'a> {
    body: &'a [u8],
    position: usize,
}

impl<'a> BodyReader<'a> {
    /// Start reading at the beginning of `body`.
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, position: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.body.len() - self.position
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(n)?;
        let slice = self.body.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16_be(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24_be(&mut self) -> Option<u32> {
        self.take(3)
            .map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn u32_be(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Render device text: zero bytes dropped, the rest decoded lossily.
pub(crate) fn device_text(bytes: &[u8]) -> String {
    let kept: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8_lossy(&kept).into_owned()
}
