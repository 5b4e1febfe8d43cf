use std::collections::BTreeMap;

use crate::model::{CategorySummary, Resource};

use super::{AllocationEngine, EngineError, ResourceStore};

/// Group by stored category string, ascending by name.
pub fn summarize_resources(resources: &[Resource]) -> Vec<CategorySummary> {
    let mut by_category: BTreeMap<&str, CategorySummary> = BTreeMap::new();
    for r in resources {
        let entry = by_category
            .entry(r.category.as_str())
            .or_insert_with(|| CategorySummary::empty(&r.category));
        entry.total_resources += 1;
        entry.total_used += u64::from(r.used);
        entry.total_capacity += u64::from(r.capacity);
        if r.is_available() {
            entry.available_resources += 1;
        }
    }
    by_category.into_values().collect()
}

impl<S: ResourceStore> AllocationEngine<S> {
    /// Reporting view over one read of all doctors. May lag concurrent bookings.
    pub async fn summarize(&self) -> Result<Vec<CategorySummary>, EngineError> {
        let all = self.call_store(self.store.read_all()).await?;
        Ok(summarize_resources(&all))
    }
}
