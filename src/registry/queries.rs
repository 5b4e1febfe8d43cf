use crate::model::*;

use super::Registry;

impl Registry {
    /// Doctors of one specialization (case-insensitive, whole string), by id.
    pub async fn matching(&self, category: &str) -> Vec<Resource> {
        let mut out = Vec::new();
        for shared in self.shared_resources() {
            let guard = shared.read().await;
            if guard.matches_category(category) {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every doctor, by id. Each record is read under its own lock; the set as
    /// a whole is not a point-in-time view.
    pub async fn snapshot(&self) -> Vec<Resource> {
        let mut out = Vec::with_capacity(self.resources.len());
        for shared in self.shared_resources() {
            out.push(shared.read().await.clone());
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every doctor, least loaded (by `used / capacity`) first.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut all = self.snapshot().await;
        all.sort_by(Resource::cmp_load);
        all
    }
}
