//! Attachment metadata.
//!
//! The actual content is NOT loaded until extraction time.
//! Only offsets and metadata are kept.

/// Metadata about an email attachment.
///
/// Content is accessed lazily: the payload is only decoded when
/// explicitly requested through [`crate::store::reader::MboxStore::extract_attachment`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// 1-based position among the message's attachments, in MIME traversal order.
    pub ordinal: usize,

    /// Filename of the attachment. Generated if missing from the headers.
    pub filename: String,

    /// Declared MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Content-Transfer-Encoding (`base64`, `quoted-printable`, `7bit`, `8bit`, `binary`).
    pub encoding: String,

    /// Encoded size in bytes.
    pub size: u64,

    /// `true` if the part is declared `inline` rather than `attachment`.
    pub is_inline: bool,

    /// Byte offset of the encoded content within the message (relative to the MBOX message start).
    pub content_offset: u64,

    /// Length in bytes of the encoded content.
    pub content_length: u64,
}

/// A decoded attachment payload.
#[derive(Debug, Clone)]
pub struct ExtractedAttachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}
