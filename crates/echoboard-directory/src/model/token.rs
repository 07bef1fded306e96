use echoboard_kv::Key;

/// Single-use verification token, keyed by (`targetId`, `token`). The token
/// string is stored redundantly with the key so a consumed record can still
/// be verified after deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub target_id: String,
    pub token: String,
    pub ttl_epoch_sec: i64,
}

impl Token {
    /// Joins caller-supplied parts into the composite target id.
    pub fn target_id_of(parts: &[&str]) -> String {
        parts.join("-")
    }

    pub fn key_of(target_id: &str, token: &str) -> Key {
        Key::composite(target_id, token)
    }

    pub fn key(&self) -> Key {
        Self::key_of(&self.target_id, &self.token)
    }
}
