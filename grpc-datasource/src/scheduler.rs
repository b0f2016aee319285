//! Orders the calls of a plan by their dependencies.
//!
//! Every call gets a level: 0 when it has no dependencies, otherwise one more than the highest
//! level of its dependencies. Calls of the same level never depend on each other and can be
//! dispatched concurrently once all lower levels completed.

use parking_lot::Mutex;
use tracing::instrument;
use tracing::trace;

use crate::error::SchedulingError;
use crate::json_ext::Value;
use crate::plan::RpcCall;

/// One call of the graph and the calls it waits for.
#[derive(Debug)]
pub struct FetchItem<'a> {
    pub id: usize,
    pub call: &'a RpcCall,
    pub dependent_ids: Vec<usize>,
}

pub struct DependencyGraph<'a> {
    items: Vec<FetchItem<'a>>,
    /// The marshaled result of each call, by id.
    fetch_data: Mutex<Vec<Option<Value>>>,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(calls: &'a [RpcCall]) -> Self {
        let items = calls
            .iter()
            .enumerate()
            .map(|(id, call)| FetchItem {
                id,
                call,
                dependent_ids: call.dependent_calls.clone(),
            })
            .collect();
        Self {
            items,
            fetch_data: Mutex::new(vec![None; calls.len()]),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: usize) -> Option<&FetchItem<'a>> {
        self.items.get(id)
    }

    /// Groups the calls by level, lowest level first and by id within a level.
    #[instrument(skip_all, level = "debug")]
    pub fn levels(&self) -> Result<Vec<Vec<&FetchItem<'a>>>, SchedulingError> {
        let mut levels = vec![None; self.items.len()];
        let mut visiting = vec![false; self.items.len()];
        for id in 0..self.items.len() {
            self.assign_level(id, &mut levels, &mut visiting)?;
        }

        let mut grouped: Vec<Vec<&FetchItem<'a>>> = Vec::new();
        for (item, level) in self.items.iter().zip(levels) {
            let level = level.unwrap_or_default();
            if grouped.len() <= level {
                grouped.resize_with(level + 1, Vec::new);
            }
            grouped[level].push(item);
        }
        grouped.retain(|level| !level.is_empty());
        trace!(levels = grouped.len(), "resolved call levels");
        Ok(grouped)
    }

    fn assign_level(
        &self,
        id: usize,
        levels: &mut [Option<usize>],
        visiting: &mut [bool],
    ) -> Result<usize, SchedulingError> {
        if let Some(level) = levels[id] {
            return Ok(level);
        }
        if visiting[id] {
            return Err(SchedulingError::Cycle { call: id });
        }
        visiting[id] = true;
        let mut level = 0;
        for &dependency in &self.items[id].dependent_ids {
            if dependency >= self.items.len() || dependency == id {
                return Err(if dependency == id {
                    SchedulingError::Cycle { call: id }
                } else {
                    SchedulingError::InvalidDependency {
                        call: id,
                        dependency,
                    }
                });
            }
            level = level.max(self.assign_level(dependency, levels, visiting)? + 1);
        }
        visiting[id] = false;
        levels[id] = Some(level);
        Ok(level)
    }

    /// Calls `resolve` once per level, in level order, stopping at the first error.
    pub fn topological_sort_resolve<E>(
        &self,
        mut resolve: impl FnMut(&[&FetchItem<'a>]) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<SchedulingError>,
    {
        for level in self.levels()? {
            resolve(&level)?;
        }
        Ok(())
    }

    /// The items the given call depends on.
    pub fn fetch_dependencies(&self, id: usize) -> Result<Vec<&FetchItem<'a>>, SchedulingError> {
        let item = self.items.get(id).ok_or(SchedulingError::InvalidDependency {
            call: id,
            dependency: id,
        })?;
        item.dependent_ids
            .iter()
            .map(|&dependency| {
                self.items
                    .get(dependency)
                    .ok_or(SchedulingError::InvalidDependency {
                        call: id,
                        dependency,
                    })
            })
            .collect()
    }

    /// Stores the result of a call. Safe to use from concurrently running calls.
    pub fn set_fetch_data(&self, id: usize, data: Value) {
        if let Some(slot) = self.fetch_data.lock().get_mut(id) {
            *slot = Some(data);
        }
    }

    pub fn fetch_data(&self, id: usize) -> Option<Value> {
        self.fetch_data.lock().get(id).cloned().flatten()
    }

    pub fn take_fetch_data(&self, id: usize) -> Option<Value> {
        self.fetch_data.lock().get_mut(id).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::plan::CallKind;
    use crate::plan::RpcMessage;

    fn calls(dependencies: &[&[usize]]) -> Vec<RpcCall> {
        dependencies
            .iter()
            .enumerate()
            .map(|(id, dependencies)| RpcCall {
                id,
                kind: CallKind::Standard,
                service_name: "Service".to_string(),
                method_name: format!("Method{id}"),
                dependent_calls: dependencies.to_vec(),
                request: RpcMessage::new("Request"),
                response: RpcMessage::new("Response"),
                response_path: None,
            })
            .collect()
    }

    fn level_ids(graph: &DependencyGraph<'_>) -> Result<Vec<Vec<usize>>, SchedulingError> {
        Ok(graph
            .levels()?
            .into_iter()
            .map(|level| level.into_iter().map(|item| item.id).collect())
            .collect())
    }

    #[test]
    fn groups_calls_by_level() {
        let calls = calls(&[&[], &[0], &[], &[1, 2], &[0]]);
        let graph = DependencyGraph::new(&calls);
        assert_eq!(
            level_ids(&graph).unwrap(),
            vec![vec![0, 2], vec![1, 4], vec![3]]
        );
    }

    #[test]
    fn dependencies_always_run_on_a_lower_level() {
        let calls = calls(&[&[3], &[0, 2], &[], &[2], &[1, 3]]);
        let graph = DependencyGraph::new(&calls);
        let levels = level_ids(&graph).unwrap();
        let level_of = |id: usize| levels.iter().position(|level| level.contains(&id)).unwrap();
        let mut seen: Vec<usize> = levels.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        for call in &calls {
            for &dependency in &call.dependent_calls {
                assert!(level_of(dependency) < level_of(call.id));
            }
        }
    }

    #[test]
    fn detects_cycles() {
        let calls = calls(&[&[], &[2], &[1]]);
        let graph = DependencyGraph::new(&calls);
        assert!(matches!(
            graph.levels(),
            Err(SchedulingError::Cycle { .. })
        ));

        let calls = self::calls(&[&[0]]);
        let graph = DependencyGraph::new(&calls);
        assert_eq!(
            graph.levels().map(|_| ()),
            Err(SchedulingError::Cycle { call: 0 })
        );
    }

    #[test]
    fn rejects_out_of_range_dependencies() {
        let calls = calls(&[&[], &[5]]);
        let graph = DependencyGraph::new(&calls);
        assert_eq!(
            graph.levels().map(|_| ()),
            Err(SchedulingError::InvalidDependency {
                call: 1,
                dependency: 5
            })
        );
        assert!(graph.fetch_dependencies(1).is_err());
    }

    #[test]
    fn resolves_levels_in_order_and_stops_on_error() {
        let calls = calls(&[&[], &[0], &[1]]);
        let graph = DependencyGraph::new(&calls);
        let mut visited = Vec::new();
        let result: Result<(), SchedulingError> = graph.topological_sort_resolve(|level| {
            visited.push(level.iter().map(|item| item.id).collect::<Vec<_>>());
            if level[0].id == 1 {
                return Err(SchedulingError::Cycle { call: 1 });
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(visited, vec![vec![0], vec![1]]);
    }

    #[test]
    fn stores_fetch_data() {
        let calls = calls(&[&[], &[0]]);
        let graph = DependencyGraph::new(&calls);
        let dependencies = graph.fetch_dependencies(1).unwrap();
        assert_eq!(dependencies.len(), 1);
        assert_eq!(dependencies[0].id, 0);

        assert_eq!(graph.fetch_data(0), None);
        graph.set_fetch_data(0, json!({"user": {"id": "1"}}));
        assert_eq!(graph.fetch_data(0), Some(json!({"user": {"id": "1"}})));
        assert_eq!(graph.take_fetch_data(0), Some(json!({"user": {"id": "1"}})));
        assert_eq!(graph.fetch_data(0), None);
    }
}
