//! Token issuing and verification on top of the row store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use greenlight_auth::{Account, Scope, Token, TokenHash};
use greenlight_core::{AccountId, DomainError, DomainResult};

use crate::store::{AccountStore, TokenStore};

#[derive(Clone)]
pub struct TokenService {
    tokens: Arc<dyn TokenStore>,
    accounts: Arc<dyn AccountStore>,
}

impl TokenService {
    pub fn new(tokens: Arc<dyn TokenStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { tokens, accounts }
    }

    /// Mint and persist a token. The returned plaintext is the only copy.
    pub async fn issue(
        &self,
        account_id: AccountId,
        ttl: Duration,
        scope: Scope,
    ) -> DomainResult<Token> {
        let token = Token::generate(account_id, ttl, scope, Utc::now())
            .map_err(|e| DomainError::unrecoverable(e.to_string()))?;

        self.tokens.insert(&token).await?;
        debug!(account_id = %account_id, scope = %scope, expiry = %token.expiry, "token issued");

        Ok(token)
    }

    /// Owner of a live token of `scope`.
    ///
    /// Unknown, expired and wrong-scope tokens all fail with
    /// [`DomainError::RecordNotFound`].
    pub async fn resolve(&self, plaintext: &str, scope: Scope) -> DomainResult<Account> {
        let hash = TokenHash::of(plaintext);
        Ok(self.accounts.get_for_token(&hash, scope, Utc::now()).await?)
    }

    /// Drop every outstanding token of `scope` for the account.
    pub async fn revoke_all(&self, scope: Scope, account_id: AccountId) -> DomainResult<()> {
        self.tokens.delete_all_for_account(scope, account_id).await?;
        debug!(account_id = %account_id, scope = %scope, "tokens revoked");
        Ok(())
    }
}
