use std::fmt;

/// A lazy, single-use sequence of chunks.
pub type ChunkIter = Box<dyn Iterator<Item = Chunk> + Send>;

/// One element of a streamed body: bytes, or another lazy sequence to be
/// spliced in at this position.
pub enum Chunk {
    Bytes(Vec<u8>),
    Nested(ChunkIter),
}

impl Chunk {
    pub fn nested<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: Send + 'static,
    {
        Chunk::Nested(Box::new(iter.into_iter()))
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Bytes(v)
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Bytes(s.into_bytes())
    }
}

/// Response body. Consumed exactly once.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully buffered bytes.
    Full(Vec<u8>),
    /// Lazy chunks, possibly nested to any depth.
    Stream(ChunkIter),
}

impl Body {
    /// Wrap any iterator of chunks.
    pub fn stream<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: Send + 'static,
    {
        Body::Stream(Box::new(iter.into_iter()))
    }

    /// Wrap an iterator of byte-like items as a flat stream.
    pub fn from_chunks<I, B>(iter: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Chunk> + 'static,
    {
        Body::Stream(Box::new(iter.into_iter().map(Into::into)))
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(b) => b.is_empty(),
            Body::Stream(_) => false,
        }
    }

    /// Length when already known without consuming anything.
    #[must_use]
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Full(b) => Some(b.len()),
            Body::Stream(_) => None,
        }
    }

    /// Move the body out, leaving [`Body::Empty`].
    pub fn take(&mut self) -> Body {
        std::mem::take(self)
    }

    /// Drain every chunk into one buffer.
    #[must_use]
    pub fn collapse(self) -> Vec<u8> {
        match self {
            Body::Empty => Vec::new(),
            Body::Full(b) => b,
            Body::Stream(s) => Flatten::new(s).fold(Vec::new(), |mut acc, chunk| {
                acc.extend_from_slice(&chunk);
                acc
            }),
        }
    }

    /// Iterate the body as flat, non-empty byte chunks.
    #[must_use]
    pub fn into_chunks(self) -> Flatten {
        match self {
            Body::Empty => Flatten::empty(),
            Body::Full(b) => Flatten::new(Box::new(std::iter::once(Chunk::Bytes(b)))),
            Body::Stream(s) => Flatten::new(s),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(b) => write!(f, "Body::Full({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Full(v)
    }
}

impl From<&[u8]> for Body {
    fn from(v: &[u8]) -> Self {
        Body::Full(v.to_vec())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Full(s.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Full(s.as_bytes().to_vec())
    }
}

/// Depth-first flattening of nested chunk sequences using an explicit stack,
/// so nesting depth never grows the call stack.
pub struct Flatten {
    stack: Vec<ChunkIter>,
}

impl Flatten {
    fn new(root: ChunkIter) -> Self {
        Self { stack: vec![root] }
    }

    fn empty() -> Self {
        Self { stack: Vec::new() }
    }
}

impl Iterator for Flatten {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(Chunk::Bytes(b)) if b.is_empty() => continue,
                Some(Chunk::Bytes(b)) => return Some(b),
                Some(Chunk::Nested(inner)) => self.stack.push(inner),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_streams_in_order() {
        let body = Body::stream(vec![
            Chunk::from("a"),
            Chunk::nested(vec![
                Chunk::from("b"),
                Chunk::nested(vec![Chunk::from(""), Chunk::from("c")]),
            ]),
            Chunk::from("d"),
        ]);
        let chunks: Vec<_> = body.into_chunks().collect();
        assert_eq!(chunks, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let mut chunk = Chunk::from("x");
        for _ in 0..10_000 {
            chunk = Chunk::nested(std::iter::once(chunk));
        }
        let body = Body::stream(std::iter::once(chunk));
        assert_eq!(body.collapse(), b"x".to_vec());
    }

    #[test]
    fn known_lengths() {
        assert_eq!(Body::Empty.known_len(), Some(0));
        assert_eq!(Body::from("abc").known_len(), Some(3));
        assert_eq!(Body::from_chunks(vec!["a"]).known_len(), None);
    }

    #[test]
    fn owned_chunks_outlive_their_builder() {
        fn numbered(n: usize) -> Body {
            Body::from_chunks((0..n).map(|i| format!("{i};")))
        }
        let body = numbered(3);
        let collapsed = std::thread::spawn(move || body.collapse()).join().unwrap();
        assert_eq!(collapsed, b"0;1;2;".to_vec());
    }
}
