//! Permission lookups and grants.
//!
//! Sets are fetched fresh on every call; a revoked code stops working on the
//! very next request.

use std::sync::Arc;

use greenlight_auth::{Permission, Permissions, authorize};
use greenlight_core::{AccountId, DomainResult};

use crate::store::PermissionStore;

#[derive(Clone)]
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    pub async fn list_for(&self, account_id: AccountId) -> DomainResult<Permissions> {
        Ok(self.store.all_for_account(account_id).await?)
    }

    pub async fn grant(&self, account_id: AccountId, codes: &[Permission]) -> DomainResult<()> {
        self.store.add_for_account(account_id, codes).await?;
        tracing::info!(account_id = %account_id, count = codes.len(), "permissions granted");
        Ok(())
    }

    pub async fn has_permission(
        &self,
        account_id: AccountId,
        required: &Permission,
    ) -> DomainResult<bool> {
        let granted = self.list_for(account_id).await?;
        Ok(authorize(&granted, required).is_ok())
    }
}
