use crate::clock::Clock;
use crate::store::{Store, StoreError};
use std::sync::Arc;
use uuid::Uuid;

/// Records which newsletters actually went out.
#[derive(Clone)]
pub struct DeliveryLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Flags the newsletters as sent now. Ids already flagged keep their
    /// original `sent_at` and do not count towards the returned total.
    #[tracing::instrument(name = "Recording sent newsletters", skip(self))]
    pub async fn record_sent(&self, newsletter_ids: &[Uuid]) -> Result<u64, StoreError> {
        if newsletter_ids.is_empty() {
            return Ok(0);
        }
        let updated = self
            .store
            .mark_newsletters_sent(newsletter_ids, self.clock.now())
            .await?;
        tracing::info!(updated, "Newsletters marked as sent.");

        Ok(updated)
    }
}
