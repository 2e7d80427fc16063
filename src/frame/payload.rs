use std::fmt::{Debug, Formatter};

use bytes::{Bytes, BytesMut};

/// Application data plus optional metadata. An empty metadata block is distinct from absent
///  metadata: only the former sets the METADATA flag on the wire.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Payload {
        Payload {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Payload {
        Payload {
            data: data.into(),
            metadata: Some(metadata.into()),
        }
    }

    pub fn empty() -> Payload {
        Default::default()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// combined length of data and metadata
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a fragment's data and metadata to this payload
    pub fn append(&mut self, fragment: Payload) {
        self.data = concat(&self.data, &fragment.data);
        self.metadata = match (self.metadata.take(), fragment.metadata) {
            (None, None) => None,
            (Some(m), None) | (None, Some(m)) => Some(m),
            (Some(a), Some(b)) => Some(concat(&a, &b)),
        };
    }
}

fn concat(a: &Bytes, b: &Bytes) -> Bytes {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    let mut buf = BytesMut::with_capacity(a.len() + b.len());
    buf.extend_from_slice(a);
    buf.extend_from_slice(b);
    buf.freeze()
}

impl Debug for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.metadata {
            Some(metadata) => write!(f, "Payload[data: {} bytes, metadata: {} bytes]", self.data.len(), metadata.len()),
            None => write!(f, "Payload[data: {} bytes]", self.data.len()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::data_only(Payload::new("ab"), Payload::new("cd"), Payload::new("abcd"))]
    #[case::metadata_first(Payload::with_metadata("a", "m"), Payload::new("b"), Payload::with_metadata("ab", "m"))]
    #[case::metadata_second(Payload::new("a"), Payload::with_metadata("b", "n"), Payload::with_metadata("ab", "n"))]
    #[case::metadata_both(Payload::with_metadata("a", "m"), Payload::with_metadata("b", "n"), Payload::with_metadata("ab", "mn"))]
    #[case::empty_fragment(Payload::new("a"), Payload::empty(), Payload::new("a"))]
    fn test_append(#[case] mut first: Payload, #[case] second: Payload, #[case] expected: Payload) {
        first.append(second);
        assert_eq!(first, expected);
    }

    #[test]
    fn test_empty_metadata_is_not_absent_metadata() {
        let with_empty = Payload::with_metadata("", "");
        assert!(with_empty.has_metadata());
        assert!(with_empty.is_empty());
        assert_ne!(with_empty, Payload::empty());
    }
}
