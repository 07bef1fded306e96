//! Single-use verification token store.
use crate::codec;
use crate::config::DirectoryConfig;
use crate::epoch_now;
use crate::error::{StoreError, StoreResult};
use crate::model::Token;
use async_trait::async_trait;
use echoboard_kv::{KeyValueBackend, Precondition};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use super::TokenStore;

pub struct KvTokenStore {
    backend: Arc<dyn KeyValueBackend>,
    config: DirectoryConfig,
}

impl KvTokenStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: DirectoryConfig) -> Self {
        Self { backend, config }
    }
}

#[async_trait]
impl TokenStore for KvTokenStore {
    async fn create_token(&self, target_id_parts: &[&str]) -> StoreResult<Token> {
        let token = Token {
            target_id: Token::target_id_of(target_id_parts),
            token: generate_token(self.config.token_size),
            ttl_epoch_sec: epoch_now() + self.config.token_expiry.as_secs() as i64,
        };
        // Collisions are astronomically unlikely; the put is unconditional.
        self.backend
            .put(
                codec::TOKEN_TABLE,
                codec::encode_token(&token),
                Precondition::None,
            )
            .await
            .map_err(StoreError::backend)?;
        metrics::counter!("echoboard_tokens_created_total").increment(1);
        Ok(token)
    }

    async fn use_token(&self, token: &str, target_id_parts: &[&str]) -> StoreResult<bool> {
        let target_id = Token::target_id_of(target_id_parts);
        // Delete first, verify after: any attempt consumes the record, so
        // replay is impossible even for expired tokens.
        let deleted = self
            .backend
            .delete(
                codec::TOKEN_TABLE,
                &Token::key_of(&target_id, token),
                Precondition::None,
            )
            .await
            .map_err(StoreError::backend)?;
        let Some(item) = deleted else {
            return Ok(false);
        };
        let stored = codec::decode_token(item)?;
        let valid = stored.target_id == target_id
            && stored.token == token
            && stored.ttl_epoch_sec >= epoch_now();
        if valid {
            metrics::counter!("echoboard_tokens_used_total").increment(1);
        }
        Ok(valid)
    }
}

fn generate_token(size: usize) -> String {
    let rng = rand::thread_rng();
    rng.sample_iter(Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}
