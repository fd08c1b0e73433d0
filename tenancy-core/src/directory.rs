//! Tenant directory contract
//!
//! The directory is the authoritative, externally owned store of tenant
//! records. Resolution code only ever reads from it.

use crate::error::DirectoryError;
use crate::identity::{TenantDbId, TenantSlug};
use crate::record::TenantRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only lookup interface over tenant records.
///
/// Implementations return `Ok(None)` when no record exists and reserve
/// `Err` for "could not check" (unreachable store, failed query). Records
/// are returned whatever their status; filtering inactive tenants is the
/// caller's decision.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find the record whose public slug is `slug`.
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError>;

    /// Find the record whose internal id is `db_id`.
    async fn find_by_db_id(&self, db_id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError>;
}

#[async_trait]
impl<D: TenantDirectory + ?Sized> TenantDirectory for Arc<D> {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
        (**self).find_by_slug(slug).await
    }

    async fn find_by_db_id(&self, db_id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
        (**self).find_by_db_id(db_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TenantStatus;

    struct SingleTenant(TenantRecord);

    #[async_trait]
    impl TenantDirectory for SingleTenant {
        async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
            Ok((&self.0.slug == slug).then(|| self.0.clone()))
        }

        async fn find_by_db_id(&self, db_id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
            Ok((self.0.db_id == db_id).then(|| self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_arc_forwards_lookups() {
        let record = TenantRecord::from_raw("nrna", 42, TenantStatus::Active).unwrap();
        let directory: Arc<dyn TenantDirectory> = Arc::new(SingleTenant(record.clone()));

        let by_slug = directory.find_by_slug(&record.slug).await.unwrap();
        assert_eq!(by_slug, Some(record.clone()));

        let by_id = directory
            .find_by_db_id(TenantDbId::new(43).unwrap())
            .await
            .unwrap();
        assert_eq!(by_id, None);
    }
}
