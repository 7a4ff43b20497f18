//! On-demand identity erasure.
//!
//! Thin policy layer over [`ConversationStore::delete_all`]: it runs the
//! transactional delete, then independently re-checks that nothing remains
//! before handing the certificate to the caller. A certificate is a claim of
//! completed deletion, so it is only released once that claim has been
//! verified against the live tables.

use crate::conversation_store::{ConversationStore, DeletionCertificate};
use crate::error::{StoreError, StoreResult};
use tracing::{error, info};

#[derive(Clone)]
pub struct ErasureService {
    store: ConversationStore,
}

impl ErasureService {
    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }

    /// Erases every record for one user and returns the verified
    /// deletion certificate.
    pub fn erase(&self, real_id: &str) -> StoreResult<DeletionCertificate> {
        let cert = self
            .store
            .delete_all(real_id)
            .map_err(|e| match e {
                StoreError::Validation(_) | StoreError::Crypto(_) => e,
                other => StoreError::Erasure(other.to_string()),
            })?;

        let remaining = self.store.rows_remaining(real_id)?;
        if remaining > 0 {
            error!(remaining, "rows survived an erasure transaction");
            return Err(StoreError::Erasure(format!(
                "{remaining} rows remain after deletion"
            )));
        }

        info!(certificate = %cert.certificate_id, "identity erased");
        Ok(cert)
    }
}
