//! In-process `SuggestBackend`. Keeps a live map per index for `get` and a
//! refreshed snapshot for `search`/`count`, mirroring near-real-time stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::alias::AliasTable;
use crate::error::{Result, SuggestError};
use crate::query::{execute, QueryExpr, SearchHits, SearchRequest};
use crate::traits::{AliasAction, BulkFailure, BulkOp, BulkResponse, SuggestBackend};
use crate::types::{keys, Record};

#[derive(Debug, Default, Clone)]
struct PhysicalIndex {
    live: BTreeMap<String, Record>,
    visible: BTreeMap<String, Record>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, PhysicalIndex>,
    aliases: AliasTable,
}

impl State {
    fn resolve(&self, target: &str) -> Result<Vec<String>> {
        if self.indices.contains_key(target) {
            return Ok(vec![target.to_string()]);
        }
        let names = self.aliases.resolve(target);
        if names.is_empty() {
            return Err(SuggestError::NotFound(format!("index or alias '{target}'")));
        }
        Ok(names)
    }

    fn resolve_one(&self, target: &str) -> Result<String> {
        let mut names = self.resolve(target)?;
        if names.len() != 1 {
            return Err(SuggestError::AliasConflict { alias: target.to_string(), indices: names });
        }
        Ok(names.remove(0))
    }

    fn index_mut(&mut self, target: &str) -> Result<&mut PhysicalIndex> {
        let name = self.resolve_one(target)?;
        self.indices
            .get_mut(&name)
            .ok_or_else(|| SuggestError::NotFound(format!("index '{name}'")))
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuggestBackend for MemoryBackend {
    async fn create_index(&self, name: &str, aliases: &[String]) -> Result<()> {
        let mut state = self.state.write();
        if state.indices.contains_key(name) || state.aliases.contains(name) {
            return Err(SuggestError::Operation(format!("index '{name}' already exists")));
        }
        state.indices.insert(name.to_string(), PhysicalIndex::default());
        for alias in aliases {
            state.aliases.attach(name, alias);
        }
        tracing::debug!(index = %name, ?aliases, "created in-memory index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.indices.remove(name).is_none() {
            return Err(SuggestError::NotFound(format!("index '{name}'")));
        }
        state.aliases.detach_index(name);
        tracing::debug!(index = %name, "deleted in-memory index");
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state.indices.keys().filter(|n| n.starts_with(prefix)).cloned().collect())
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        let state = self.state.read();
        Ok(state.indices.contains_key(target) || state.aliases.contains(target))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state.aliases.resolve(alias))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.state.write();
        let State { indices, aliases } = &mut *state;
        aliases.apply(actions, |name| indices.contains_key(name))
    }

    async fn get(&self, target: &str, ids: &[String]) -> Result<Vec<Record>> {
        let state = self.state.read();
        let names = state.resolve(target)?;
        let mut out = Vec::new();
        for id in ids {
            for name in &names {
                if let Some(record) = state.indices.get(name).and_then(|i| i.live.get(id)) {
                    out.push(record.clone());
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn bulk(&self, target: &str, ops: Vec<BulkOp>) -> Result<BulkResponse> {
        let mut state = self.state.write();
        let index = state.index_mut(target)?;
        let mut response = BulkResponse::default();
        for op in ops {
            match op {
                BulkOp::Put(record) => match record.get(keys::ID).and_then(|v| v.as_str()) {
                    Some(id) => {
                        index.live.insert(id.to_string(), record.clone());
                        response.succeeded += 1;
                    }
                    None => response.failures.push(BulkFailure {
                        id: String::new(),
                        reason: "record has no id".to_string(),
                    }),
                },
                BulkOp::Merge(item) => {
                    let merged = item.merged_onto(index.live.get(item.id()));
                    match merged {
                        Ok(record) => {
                            index.live.insert(item.id().to_string(), record);
                            response.succeeded += 1;
                        }
                        Err(e) => {
                            response.failures.push(BulkFailure { id: item.id().to_string(), reason: e.to_string() })
                        }
                    }
                }
                BulkOp::Delete(id) => {
                    index.live.remove(&id);
                    response.succeeded += 1;
                }
            }
        }
        Ok(response)
    }

    async fn delete_by_query(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        let mut state = self.state.write();
        let index = state.index_mut(target)?;
        let before = index.live.len();
        index.live.retain(|_, record| !query.matches(record));
        Ok((before - index.live.len()) as u64)
    }

    async fn search(&self, target: &str, request: &SearchRequest) -> Result<SearchHits> {
        let state = self.state.read();
        let names = state.resolve(target)?;
        let candidates: Vec<(String, Record)> = names
            .iter()
            .filter_map(|n| state.indices.get(n))
            .flat_map(|i| i.visible.iter().map(|(id, r)| (id.clone(), r.clone())))
            .collect();
        Ok(execute(candidates, request))
    }

    async fn count(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        let state = self.state.read();
        let names = state.resolve(target)?;
        Ok(names
            .iter()
            .filter_map(|n| state.indices.get(n))
            .map(|i| i.visible.values().filter(|r| query.matches(r)).count() as u64)
            .sum())
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        let mut state = self.state.write();
        for name in state.resolve(target)? {
            if let Some(index) = state.indices.get_mut(&name) {
                index.visible = index.live.clone();
            }
        }
        Ok(())
    }
}
