use crate::error::TakoError;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Index of a service within a [`ServiceGraph`]'s arena — traversal walks
/// indices rather than pointers, so a cycle can't cause unbounded recursion.
pub type ServiceIndex = usize;

struct ServiceNode {
    name: String,
    depends_on: Vec<ServiceIndex>,
}

pub struct ServiceGraph {
    nodes: Vec<ServiceNode>,
    index_of: HashMap<String, ServiceIndex>,
}

impl ServiceGraph {
    /// Build an index arena from `(name, depends_on)` pairs. `depends_on`
    /// names are resolved into indices; an unknown name is a caller bug
    /// (config validation already rejects this at load time) and panics.
    pub fn new(services: &[(String, Vec<String>)]) -> Self {
        let index_of: HashMap<String, ServiceIndex> = services
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();

        let nodes = services
            .iter()
            .map(|(name, deps)| ServiceNode {
                name: name.clone(),
                depends_on: deps
                    .iter()
                    .map(|d| *index_of.get(d).expect("dependsOn target must exist"))
                    .collect(),
            })
            .collect();

        Self { nodes, index_of }
    }

    pub fn index_of(&self, name: &str) -> Option<ServiceIndex> {
        self.index_of.get(name).copied()
    }

    pub fn name_of(&self, idx: ServiceIndex) -> &str {
        &self.nodes[idx].name
    }

    /// `Levels(services) -> Vec<Vec<ServiceIndex>>`: repeated-peeling
    /// levelization. Each level contains every service whose dependencies
    /// are all satisfied by earlier levels. A cycle leaves some nodes
    /// unplaced after no level makes progress — reported as a `ConfigError`
    /// naming every cyclic member.
    pub fn levels(&self) -> Result<Vec<Vec<ServiceIndex>>> {
        let n = self.nodes.len();
        let mut placed = vec![false; n];
        let mut levels = Vec::new();
        let mut remaining = n;

        while remaining > 0 {
            let level: Vec<ServiceIndex> = (0..n)
                .filter(|&i| !placed[i] && self.nodes[i].depends_on.iter().all(|&d| placed[d]))
                .collect();

            if level.is_empty() {
                let cyclic: Vec<&str> = (0..n)
                    .filter(|&i| !placed[i])
                    .map(|i| self.nodes[i].name.as_str())
                    .collect();
                return Err(TakoError::Config(format!(
                    "dependency cycle detected among services: {}",
                    cyclic.join(", ")
                ))
                .into());
            }

            for &i in &level {
                placed[i] = true;
            }
            remaining -= level.len();
            levels.push(level);
        }

        Ok(levels)
    }
}

/// Cooperative cancellation flag shared across a level's in-flight tasks.
/// Checked at each task's next suspension point rather than forcibly
/// interrupting it.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PerServiceFailure {
    pub service: String,
    pub error: String,
}

/// Run every level sequentially; within a level, fan `action` out across all
/// members under a `Semaphore`-bounded concurrency limit. One failure
/// flips the shared `CancelToken`; the level still awaits every in-flight
/// task (up to a 30s wind-down) before returning an aggregated failure list.
/// Completion of level N happens-before the start of level N+1. Stops after
/// the first level with any failure — later levels are never started.
pub async fn run_levels<F, Fut>(graph: &ServiceGraph, concurrency: usize, action: F) -> Result<Vec<PerServiceFailure>>
where
    F: Fn(ServiceIndex, String, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let levels = graph.levels()?;
    let action = Arc::new(action);

    for level in levels {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let token = CancelToken::new();
        let mut handles = Vec::new();

        for idx in level {
            let permit_sem = semaphore.clone();
            let action = action.clone();
            let token = token.clone();
            let name = graph.name_of(idx).to_string();

            handles.push(tokio::spawn(async move {
                let _permit = permit_sem.acquire().await.expect("semaphore not closed");
                if token.is_cancelled() {
                    return (name.clone(), Err(TakoError::Rollout("skipped: level cancelled".to_string())));
                }
                let result = action(idx, name.clone(), token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                (name, result.map_err(|e| TakoError::Rollout(e.to_string())))
            }));
        }

        let wind_down = tokio::time::timeout(std::time::Duration::from_secs(30), futures::future::join_all(handles));

        let joined = wind_down
            .await
            .map_err(|_| TakoError::Rollout("level wind-down exceeded 30s".to_string()))?;

        let failures: Vec<PerServiceFailure> = joined
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok((_, Ok(()))) => None,
                Ok((service, Err(e))) => Some(PerServiceFailure { service, error: e.to_string() }),
                Err(join_err) => Some(PerServiceFailure {
                    service: "unknown".to_string(),
                    error: join_err.to_string(),
                }),
            })
            .collect();

        if !failures.is_empty() {
            return Ok(failures);
        }
    }

    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(pairs: &[(&str, &[&str])]) -> ServiceGraph {
        let services: Vec<(String, Vec<String>)> = pairs
            .iter()
            .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect();
        ServiceGraph::new(&services)
    }

    #[test]
    fn levelizes_linear_chain() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let levels = g.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(g.name_of(levels[0][0]), "a");
        assert_eq!(g.name_of(levels[2][0]), "c");
    }

    #[test]
    fn groups_independent_services_in_one_level() {
        let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let levels = g.levels().unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].len(), 2);
    }

    #[test]
    fn detects_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let err = g.levels().unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
        assert!(err.to_string().contains("a"));
        assert!(err.to_string().contains("b"));
    }

    #[tokio::test]
    async fn run_levels_executes_all_services() {
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = counter.clone();

        let failures = run_levels(&g, 2, move |_idx, _name, _token| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(failures.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_levels_reports_failing_service_by_name() {
        let g = graph(&[("a", &[]), ("b", &[])]);

        let failures = run_levels(&g, 2, move |_idx, name, _token| async move {
            if name == "b" {
                Err(anyhow::anyhow!("boom"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "b");
        assert!(failures[0].error.contains("boom"));
    }
}
