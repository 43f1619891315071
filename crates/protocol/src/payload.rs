//! Payload type.

use bytes::Bytes;
use std::fmt;
use std::str::Utf8Error;

/// Data and optional metadata exchanged in one request or response.
///
/// A payload is immutable once built. Buffers are reference counted, so
/// cloning is cheap and never copies bytes. Whoever holds the value owns it;
/// handing it to a client or returning it from a handler moves it.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload {
    data: Bytes,
    metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from raw bytes.
    pub fn new(data: impl Into<Bytes>, metadata: Option<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// Create a payload from text, stored as UTF-8.
    #[must_use]
    pub fn from_text(data: &str, metadata: Option<&str>) -> Self {
        Self {
            data: Bytes::copy_from_slice(data.as_bytes()),
            metadata: metadata.map(|m| Bytes::copy_from_slice(m.as_bytes())),
        }
    }

    /// Start building a payload.
    #[must_use]
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::default()
    }

    /// The data bytes. Empty, never missing.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// The metadata bytes, if any were attached.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    /// Whether metadata is attached. Zero-length metadata counts as attached.
    #[must_use]
    pub const fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// The data interpreted as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid UTF-8.
    pub fn data_utf8(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.data)
    }

    /// The metadata interpreted as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is not valid UTF-8.
    pub fn metadata_utf8(&self) -> Result<Option<&str>, Utf8Error> {
        self.metadata
            .as_deref()
            .map(std::str::from_utf8)
            .transpose()
    }

    /// Combined length of data and metadata.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, Bytes::len)
    }

    /// Whether both data and metadata are empty or absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into data and metadata.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Option<Bytes>) {
        (self.data, self.metadata)
    }

    /// Release the payload.
    ///
    /// Consuming `self` makes a second release unrepresentable. Dropping the
    /// payload has the same effect; this exists so call sites can state the
    /// hand-back explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("data_len", &self.data.len())
            .field("metadata_len", &self.metadata.as_ref().map(Bytes::len))
            .finish()
    }
}

impl From<&str> for Payload {
    fn from(data: &str) -> Self {
        Self::from_text(data, None)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::new(data, None)
    }
}

/// Builder for [`Payload`].
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    data: Option<Bytes>,
    metadata: Option<Bytes>,
}

impl PayloadBuilder {
    /// Set the data bytes.
    #[must_use]
    pub fn set_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the data from text.
    #[must_use]
    pub fn set_data_utf8(mut self, data: &str) -> Self {
        self.data = Some(Bytes::copy_from_slice(data.as_bytes()));
        self
    }

    /// Set the metadata bytes.
    #[must_use]
    pub fn set_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Set the metadata from text.
    #[must_use]
    pub fn set_metadata_utf8(mut self, metadata: &str) -> Self {
        self.metadata = Some(Bytes::copy_from_slice(metadata.as_bytes()));
        self
    }

    /// Build the payload. Unset data becomes an empty buffer.
    #[must_use]
    pub fn build(self) -> Payload {
        Payload {
            data: self.data.unwrap_or_default(),
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_roundtrip() {
        let payload = Payload::new(Bytes::from_static(b"ping"), None);
        assert_eq!(payload.data().as_ref(), b"ping");
        assert!(payload.metadata().is_none());
    }

    #[test]
    fn test_empty_data_is_not_missing() {
        let payload = Payload::new(Bytes::new(), None);
        assert!(payload.data().is_empty());
        assert!(payload.is_empty());
        assert_eq!(payload.data_utf8().unwrap(), "");
    }

    #[test]
    fn test_empty_metadata_is_present() {
        let payload = Payload::new("x", Some(Bytes::new()));
        assert!(payload.has_metadata());
        assert_eq!(payload.metadata_utf8().unwrap(), Some(""));
    }

    #[test]
    fn test_from_text() {
        let payload = Payload::from_text("hello", Some("route.echo"));
        assert_eq!(payload.data_utf8().unwrap(), "hello");
        assert_eq!(payload.metadata_utf8().unwrap(), Some("route.echo"));
        assert_eq!(payload.len(), 15);
    }

    #[test]
    fn test_builder() {
        let payload = Payload::builder()
            .set_data_utf8("body")
            .set_metadata(vec![1, 2, 3])
            .build();
        assert_eq!(payload.data().as_ref(), b"body");
        assert_eq!(payload.metadata().unwrap().as_ref(), &[1, 2, 3]);

        let empty = Payload::builder().build();
        assert!(empty.data().is_empty());
        assert!(!empty.has_metadata());
    }

    #[test]
    fn test_clone_shares_buffers() {
        let payload = Payload::from_text("shared", None);
        let copy = payload.clone();
        assert_eq!(payload.data().as_ptr(), copy.data().as_ptr());
        payload.release();
        assert_eq!(copy.data_utf8().unwrap(), "shared");
    }

    #[test]
    fn test_invalid_utf8() {
        let payload = Payload::new(vec![0xff, 0xfe], None);
        assert!(payload.data_utf8().is_err());
    }
}
