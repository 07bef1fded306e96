use echoboard_kv::Key;

/// Slug table record. The slug string is the partition key of its own
/// table, which is what makes slugs globally unique by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugRecord {
    pub slug: String,
    pub project_id: String,
    /// Set while the mapping is in its post-rename grace period; an external
    /// housekeeper reclaims the record after this clock expires.
    pub expires_at_epoch_sec: Option<i64>,
}

impl SlugRecord {
    pub fn primary(slug: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            project_id: project_id.into(),
            expires_at_epoch_sec: None,
        }
    }

    pub fn key(slug: &str) -> Key {
        Key::hash(slug)
    }

    pub fn in_grace(&self) -> bool {
        self.expires_at_epoch_sec.is_some()
    }
}
