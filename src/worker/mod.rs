//! A projection over the engine's container list, filtered to Plancton's
//! own workers and classified by lifecycle state.

use bollard::service::ContainerSummary;

/// Every worker container is named with this prefix; nothing else is ever
/// inspected, counted, or removed.
pub const NAME_PREFIX: &str = "plancton-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Exited,
    Other,
}

/// A Plancton worker, as seen in one engine listing. `started_at` /
/// `finished_at` are populated only when a caller separately inspects the
/// container (the list endpoint does not carry them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub id: String,
    pub name: String,
    pub state: WorkerState,
    pub created: i64,
}

impl WorkerDescriptor {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// Strip a container's leading `/` and test the `plancton-worker` prefix.
fn strip_name(raw: &str) -> &str {
    raw.strip_prefix('/').unwrap_or(raw)
}

/// `Running` iff the status string begins with `Up` (matches the engine's
/// own convention); otherwise fall back to the structured state string.
fn classify(state: Option<&str>, status: Option<&str>) -> WorkerState {
    if status.is_some_and(|s| s.starts_with("Up")) {
        return WorkerState::Running;
    }
    match state.unwrap_or_default() {
        "exited" => WorkerState::Exited,
        "created" => WorkerState::Created,
        _ => WorkerState::Other,
    }
}

/// Build the registry from one `list(all=true)` response, keeping only
/// containers whose first name begins with [`NAME_PREFIX`].
pub fn from_summaries(summaries: &[ContainerSummary]) -> Vec<WorkerDescriptor> {
    summaries
        .iter()
        .filter_map(|s| {
            let id = s.id.clone()?;
            let raw_name = s.names.as_ref()?.first()?;
            let name = strip_name(raw_name).to_owned();
            if !name.starts_with(NAME_PREFIX) {
                return None;
            }
            Some(WorkerDescriptor {
                id,
                name,
                state: classify(s.state.as_deref(), s.status.as_deref()),
                created: s.created.unwrap_or(0),
            })
        })
        .collect()
}

/// Count workers observed as `Running`.
pub fn count_running(workers: &[WorkerDescriptor]) -> usize {
    workers
        .iter()
        .filter(|w| w.state == WorkerState::Running)
        .count()
}

/// Order workers for eviction: youngest (most recently created) first.
pub fn sort_youngest_first(workers: &mut [WorkerDescriptor]) {
    workers.sort_by(|a, b| b.created.cmp(&a.created));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, name: &str, state: &str, status: &str, created: i64) -> ContainerSummary {
        ContainerSummary {
            id: Some(id.to_owned()),
            names: Some(vec![format!("/{name}")]),
            state: Some(state.to_owned()),
            status: Some(status.to_owned()),
            created: Some(created),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_summaries_filters_by_prefix() {
        let summaries = vec![
            summary("aaa111111111", "plancton-worker-abc123", "running", "Up 5 minutes", 100),
            summary("bbb222222222", "some-other-container", "running", "Up 5 minutes", 100),
        ];
        let workers = from_summaries(&summaries);
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "plancton-worker-abc123");
    }

    #[test]
    fn test_classify_running_from_status_prefix() {
        assert_eq!(classify(Some("running"), Some("Up 2 hours")), WorkerState::Running);
    }

    #[test]
    fn test_classify_exited_from_state() {
        assert_eq!(classify(Some("exited"), Some("Exited (0) 3 minutes ago")), WorkerState::Exited);
    }

    #[test]
    fn test_classify_created_from_state() {
        assert_eq!(classify(Some("created"), Some("Created")), WorkerState::Created);
    }

    #[test]
    fn test_classify_other_for_paused_dead_restarting() {
        assert_eq!(classify(Some("paused"), Some("Paused")), WorkerState::Other);
        assert_eq!(classify(Some("dead"), Some("Dead")), WorkerState::Other);
        assert_eq!(classify(Some("restarting"), Some("Restarting")), WorkerState::Other);
    }

    #[test]
    fn test_short_id_truncates_to_twelve() {
        let w = WorkerDescriptor {
            id: "abcdefabcdefabcdefabcdef".to_owned(),
            name: "plancton-worker-abc123".to_owned(),
            state: WorkerState::Running,
            created: 0,
        };
        assert_eq!(w.short_id(), "abcdefabcdef");
    }

    #[test]
    fn test_count_running_only_counts_running() {
        let workers = vec![
            WorkerDescriptor { id: "a".into(), name: "plancton-worker-a".into(), state: WorkerState::Running, created: 1 },
            WorkerDescriptor { id: "b".into(), name: "plancton-worker-b".into(), state: WorkerState::Exited, created: 2 },
        ];
        assert_eq!(count_running(&workers), 1);
    }

    #[test]
    fn test_sort_youngest_first() {
        let mut workers = vec![
            WorkerDescriptor { id: "old".into(), name: "plancton-worker-old".into(), state: WorkerState::Running, created: 10 },
            WorkerDescriptor { id: "new".into(), name: "plancton-worker-new".into(), state: WorkerState::Running, created: 20 },
        ];
        sort_youngest_first(&mut workers);
        assert_eq!(workers[0].id, "new");
    }
}
