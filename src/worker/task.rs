use std::cmp::{Ord, Ordering, PartialOrd};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    ExpireOrphan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub tasktype: TaskType,
    pub time: Instant,
    pub correlation_id: String,
}

// Ordered by time first; the id keeps distinct tasks due at the same
// instant from collapsing into one set entry
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.correlation_id.cmp(&other.correlation_id))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_same_instant_tasks_are_kept() {
        let now = Instant::now();
        let mut tasks = BTreeSet::new();
        for id in &["b", "a", "c"] {
            tasks.insert(Task {
                tasktype: TaskType::ExpireOrphan,
                time: now,
                correlation_id: (*id).to_owned(),
            });
        }
        let ids: Vec<&str> = tasks.iter().map(|t| &*t.correlation_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
