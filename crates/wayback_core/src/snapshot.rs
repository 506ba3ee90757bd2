use crate::Timestamp;

/// One capture listed by the archive index. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    original_url: String,
    timestamp: Timestamp,
    archived_url: String,
    status_code: u16,
    mime_type: String,
    digest: Option<String>,
}

impl SnapshotRecord {
    pub fn new(
        original_url: impl Into<String>,
        timestamp: Timestamp,
        archived_url: impl Into<String>,
        status_code: u16,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            timestamp,
            archived_url: archived_url.into(),
            status_code,
            mime_type: mime_type.into(),
            digest: None,
        }
    }

    /// Attaches the content digest reported by the index, when it has one.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        let digest = digest.into();
        self.digest = (!digest.is_empty() && digest != "-").then_some(digest);
        self
    }

    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn archived_url(&self) -> &str {
        &self.archived_url
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// `{base}{timestamp}id_/{original}`; the `id_` flag asks for the capture
/// exactly as it was stored, without the archive's link rewriting.
pub fn archived_url_for(snapshot_base: &str, timestamp: Timestamp, original_url: &str) -> String {
    let base = snapshot_base.trim_end_matches('/');
    format!("{base}/{timestamp}id_/{original_url}")
}

/// Extracts the capture timestamp from an archived URL such as
/// `https://web.archive.org/web/20070221000000id_/http://example.com/`.
pub fn capture_timestamp(archived_url: &str) -> Option<Timestamp> {
    let (_, rest) = archived_url.split_once("/web/")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    Timestamp::parse_compact(&digits).ok()
}
