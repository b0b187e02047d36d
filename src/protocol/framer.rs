use log::trace;

/// Splits a byte stream into delimiter terminated messages.
///
/// At most `max_len - 1` bytes are held for a candidate message. Once a
/// message reaches `max_len` bytes without a delimiter, its bytes are dropped
/// until the next delimiter, which resynchronizes the framing. Bytes after the
/// last delimiter are never emitted.
#[derive(Debug, Clone)]
pub struct Framer {
    delimiter: Vec<u8>,
    max_len: usize,
    pending: Vec<Vec<u8>>,
    received: usize,
}

impl Framer {
    pub fn new(delimiter: impl Into<Vec<u8>>, max_len: usize) -> Self {
        let delimiter = delimiter.into();
        assert!(!delimiter.is_empty());
        assert!(max_len > 0);

        Self {
            delimiter,
            max_len,
            pending: Vec::new(),
            received: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    #[cfg(test)]
    fn is_overflowing(&self) -> bool {
        self.received >= self.max_len
    }

    /// Consumes one read worth of data, yielding every message it completes.
    ///
    /// Data left unconsumed when the iterator is dropped is lost, so callers
    /// should drain it.
    pub fn feed<'a>(&'a mut self, data: &'a [u8]) -> Frames<'a> {
        Frames { framer: self, data }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.received = 0;
    }
}

/// Messages completed by one [`Framer::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut Framer,
    data: &'a [u8],
}

impl Iterator for Frames<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.data.is_empty() {
            let (chunk, found, rest) = partition(self.data, &self.framer.delimiter);
            self.data = rest;

            let framer = &mut *self.framer;
            framer.received += chunk.len();

            if framer.received < framer.max_len {
                framer.pending.push(chunk.to_vec());
                if found {
                    let msg = framer.pending.concat();
                    framer.reset();
                    return Some(msg);
                }
            } else if found {
                trace!("discarded message of at least {} bytes", framer.received);
                framer.reset();
            }
        }

        None
    }
}

/// Splits `data` around the first occurrence of `delimiter`.
fn partition<'a>(data: &'a [u8], delimiter: &[u8]) -> (&'a [u8], bool, &'a [u8]) {
    match data
        .windows(delimiter.len())
        .position(|window| window == delimiter)
    {
        Some(at) => (&data[..at], true, &data[at + delimiter.len()..]),
        None => (data, false, &[]),
    }
}
