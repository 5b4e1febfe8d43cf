use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A capacity-bounded resource: one doctor and their daily appointment quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    /// Specialization. Matched case-insensitively, stored as registered.
    pub category: String,
    /// Max appointments per day (>= 1).
    pub capacity: u32,
    /// Appointments taken today. Never exceeds `capacity`.
    pub used: u32,
}

impl Resource {
    pub fn new(id: impl Into<String>, category: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            capacity,
            used: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.used < self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.used)
    }

    /// Whole-string, case-insensitive comparison against a requested category.
    pub fn matches_category(&self, category: &str) -> bool {
        self.category
            .chars()
            .flat_map(char::to_lowercase)
            .eq(category.chars().flat_map(char::to_lowercase))
    }

    /// Orders by `used / capacity` without going through floats, then by id.
    pub fn cmp_load(&self, other: &Resource) -> Ordering {
        let lhs = u64::from(self.used) * u64::from(other.capacity);
        let rhs = u64::from(other.used) * u64::from(self.capacity);
        lhs.cmp(&rhs).then_with(|| self.id.cmp(&other.id))
    }
}

/// A committed allocation: which doctor took the appointment and their new load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub resource_id: String,
    pub category: String,
    pub used: u32,
    pub capacity: u32,
}

impl From<Resource> for Booking {
    fn from(r: Resource) -> Self {
        Self {
            resource_id: r.id,
            category: r.category,
            used: r.used,
            capacity: r.capacity,
        }
    }
}

/// Per-specialization aggregate, derived on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub category: String,
    pub total_resources: usize,
    pub total_used: u64,
    pub total_capacity: u64,
    /// Resources with `used < capacity`.
    pub available_resources: usize,
}

impl CategorySummary {
    pub fn empty(category: &str) -> Self {
        Self {
            category: category.to_string(),
            total_resources: 0,
            total_used: 0,
            total_capacity: 0,
            available_resources: 0,
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// `used` is 0 for a fresh registration; compaction writes the live value.
    ResourceCreated {
        id: String,
        category: String,
        capacity: u32,
        used: u32,
    },
    AppointmentBooked {
        id: String,
    },
    UsageReset {
        id: String,
    },
}
