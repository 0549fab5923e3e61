use bytes::Bytes;

/// A unit of work flowing through the codec: either the head of a message or
/// a piece of its payload.
///
/// The decoder produces `Message<(RequestHeader, PayloadSize)>` items; the
/// encoder consumes `Message<(ResponseHead, PayloadSize)>` items. Splitting
/// head and payload lets the connection interleave header dispatch with body
/// aggregation without buffering whole messages inside the codec.
#[derive(Debug)]
pub enum Message<T> {
    /// The head of a request or response
    Header(T),
    /// A chunk of payload data or the end-of-payload marker
    Payload(PayloadItem),
}

/// One item of a message payload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload bytes
    Chunk(Bytes),
    /// End of the payload stream
    Eof,
}

/// Wire framing of a message body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Body with a known length, framed by Content-Length
    Length(u64),
    /// Body using chunked transfer encoding (ingress only)
    Chunked,
    /// No body
    Empty,
    /// Body left open with no framing header; used for event streams where
    /// the connection is handed over to the streaming engine after the head
    Unframed,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    #[inline]
    pub fn is_unframed(&self) -> bool {
        matches!(self, PayloadSize::Unframed)
    }
}

impl<T> Message<T> {
    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }

    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// Returns the contained bytes if this is a chunk.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Consumes the item and returns the contained bytes if this is a chunk.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
