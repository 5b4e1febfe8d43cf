use std::time::Instant;

use tracing::{debug, info, warn};

use crate::model::{Booking, Resource};
use crate::observability::{BOOKINGS_TOTAL, BOOKING_DURATION_SECONDS};

use super::{AllocationEngine, EngineError, ResourceStore};

/// Minimum-load policy: fewest appointments taken, ties to the smallest id.
/// Full resources are never chosen. `None` when nothing has room.
pub fn select_least_loaded(candidates: &[Resource]) -> Option<&Resource> {
    candidates
        .iter()
        .filter(|r| r.is_available())
        .min_by(|a, b| a.used.cmp(&b.used).then_with(|| a.id.cmp(&b.id)))
}

impl<S: ResourceStore> AllocationEngine<S> {
    /// Book one appointment with the least-loaded doctor of `category`.
    ///
    /// On success exactly one doctor's counter went up by one. On any error
    /// nothing was mutated. `BookingConflict` is not retried here: the caller
    /// re-issues the whole call so candidates are re-read.
    pub async fn book(&self, category: &str) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.try_book(category).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => e.reason().code(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_book(&self, category: &str) -> Result<Booking, EngineError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(EngineError::InvalidInput("specialization is required"));
        }

        let candidates = self.call_store(self.store.find_by_category(category)).await?;
        if candidates.is_empty() {
            return Err(EngineError::CategoryNotFound(category.to_string()));
        }

        let Some(selected) = select_least_loaded(&candidates) else {
            return Err(EngineError::CapacityExhausted {
                category: category.to_string(),
                total: candidates.len(),
            });
        };
        debug!(
            "selected {} for {category} ({}/{} used, {} candidates)",
            selected.id,
            selected.used,
            selected.capacity,
            candidates.len()
        );

        match self.call_store(self.store.conditional_increment(&selected.id)).await? {
            Some(updated) => {
                info!(
                    "booked {} ({}), slot {} of {}",
                    updated.id, updated.category, updated.used, updated.capacity
                );
                Ok(Booking::from(updated))
            }
            None => {
                warn!("booking conflict on {}: filled after selection", selected.id);
                Err(EngineError::BookingConflict(selected.id.clone()))
            }
        }
    }
}
