use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use suggest_core::alias::AliasTable;
use suggest_core::config::{expand_path, StorageConfig};
use suggest_core::error::{Result, SuggestError};
use suggest_core::query::{execute, QueryExpr, SearchHits, SearchRequest};
use suggest_core::traits::{AliasAction, BulkFailure, BulkOp, BulkResponse, SuggestBackend};
use suggest_core::types::{Record, SuggestItem};

use crate::compile::compile;
use crate::schema::{build_schema, fields_of, from_document, record_id, to_document, StoreFields};

const ALIAS_FILE: &str = "aliases.json";
/// Per-writer arena floor enforced by tantivy.
const MIN_WRITER_HEAP: usize = 15_000_000;

pub(crate) fn store_err(e: tantivy::TantivyError) -> SuggestError {
    SuggestError::Backend(e.to_string())
}

struct WriteState {
    writer: IndexWriter,
    /// Uncommitted puts (`Some`) and deletes (`None`) by id, so `get` sees
    /// writes before the next refresh.
    pending: HashMap<String, Option<Record>>,
}

struct StoreIndex {
    reader: IndexReader,
    fields: StoreFields,
    write: Mutex<WriteState>,
}

impl StoreIndex {
    fn from_index(index: Index, heap_bytes: usize) -> Result<Self> {
        let fields = fields_of(&index.schema())?;
        let writer = index
            .writer_with_num_threads(1, heap_bytes.max(MIN_WRITER_HEAP))
            .map_err(store_err)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(store_err)?;
        Ok(Self { reader, fields, write: Mutex::new(WriteState { writer, pending: HashMap::new() }) })
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    /// Committed records matching `query`, as of the last refresh.
    fn committed(&self, query: &QueryExpr) -> Result<Vec<(String, Record)>> {
        let searcher = self.reader.searcher();
        let compiled = compile(query, self.fields.terms)?;
        let addresses = searcher.search(compiled.query.as_ref(), &DocSetCollector).map_err(store_err)?;
        let mut out = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address).map_err(store_err)?;
            let record = from_document(&self.fields, &doc)?;
            if query.matches(&record) {
                if let Some(id) = record_id(&record) {
                    out.push((id.to_string(), record));
                }
            }
        }
        Ok(out)
    }

    fn committed_by_id(&self, id: &str) -> Result<Option<Record>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        let addresses = searcher.search(&query, &DocSetCollector).map_err(store_err)?;
        match addresses.into_iter().next() {
            Some(address) => {
                let doc: TantivyDocument = searcher.doc(address).map_err(store_err)?;
                Ok(Some(from_document(&self.fields, &doc)?))
            }
            None => Ok(None),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        if let Some(pending) = self.write.lock().pending.get(id) {
            return Ok(pending.clone());
        }
        self.committed_by_id(id)
    }

    fn put(&self, state: &mut WriteState, id: String, record: Record) -> Result<()> {
        let doc = to_document(&self.fields, &record)?;
        state.writer.delete_term(self.id_term(&id));
        state.writer.add_document(doc).map_err(store_err)?;
        state.pending.insert(id, Some(record));
        Ok(())
    }

    /// Stored form of `item` folded into the current record, read while the
    /// caller holds the write lock so concurrent merges cannot interleave.
    fn merged(&self, state: &WriteState, item: &SuggestItem) -> Result<Record> {
        match state.pending.get(item.id()) {
            Some(pending) => item.merged_onto(pending.as_ref()),
            None => item.merged_onto(self.committed_by_id(item.id())?.as_ref()),
        }
    }

    fn bulk(&self, ops: Vec<BulkOp>) -> BulkResponse {
        let mut state = self.write.lock();
        let mut response = BulkResponse::default();
        for op in ops {
            let (id, written) = match op {
                BulkOp::Put(record) => {
                    let id = record_id(&record).unwrap_or_default().to_string();
                    let written = self.put(&mut state, id.clone(), record);
                    (id, written)
                }
                BulkOp::Merge(item) => {
                    let id = item.id().to_string();
                    let written = self.merged(&state, &item).and_then(|record| self.put(&mut state, id.clone(), record));
                    (id, written)
                }
                BulkOp::Delete(id) => {
                    state.writer.delete_term(self.id_term(&id));
                    state.pending.insert(id.clone(), None);
                    (id, Ok(()))
                }
            };
            match written {
                Ok(()) => response.succeeded += 1,
                Err(e) => response.failures.push(BulkFailure { id, reason: e.to_string() }),
            }
        }
        response
    }

    fn delete_by_query(&self, query: &QueryExpr) -> Result<u64> {
        let committed = self.committed(query)?;
        let mut state = self.write.lock();
        let mut doomed: Vec<String> = committed
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !state.pending.contains_key(id))
            .collect();
        doomed.extend(
            state
                .pending
                .iter()
                .filter(|(_, r)| r.as_ref().is_some_and(|r| query.matches(r)))
                .map(|(id, _)| id.clone()),
        );
        for id in &doomed {
            state.writer.delete_term(self.id_term(id));
            state.pending.insert(id.clone(), None);
        }
        Ok(doomed.len() as u64)
    }

    fn refresh(&self) -> Result<()> {
        let mut state = self.write.lock();
        state.writer.commit().map_err(store_err)?;
        state.pending.clear();
        self.reader.reload().map_err(store_err)
    }
}

#[derive(Default)]
struct Catalog {
    indices: BTreeMap<String, Arc<StoreIndex>>,
    aliases: AliasTable,
}

/// `SuggestBackend` over one tantivy index per physical index name, either
/// in RAM or as sibling directories under a root. Aliases live in
/// `<root>/aliases.json`.
pub struct TantivyBackend {
    root: Option<PathBuf>,
    writer_heap_bytes: usize,
    catalog: RwLock<Catalog>,
}

impl TantivyBackend {
    pub fn in_ram(writer_heap_bytes: usize) -> Self {
        Self { root: None, writer_heap_bytes, catalog: RwLock::new(Catalog::default()) }
    }

    /// Open every index found under `root`, creating the directory if needed.
    pub fn open(root: &Path, writer_heap_bytes: usize) -> Result<Self> {
        fs::create_dir_all(root)?;
        let mut catalog = Catalog::default();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.join("meta.json").exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let index = Index::open_in_dir(&path).map_err(store_err)?;
            catalog.indices.insert(name, Arc::new(StoreIndex::from_index(index, writer_heap_bytes)?));
        }
        let alias_path = root.join(ALIAS_FILE);
        if alias_path.exists() {
            catalog.aliases = serde_json::from_slice(&fs::read(&alias_path)?)?;
        }
        tracing::info!(root = %root.display(), indices = catalog.indices.len(), "opened tantivy store");
        Ok(Self { root: Some(root.to_path_buf()), writer_heap_bytes, catalog: RwLock::new(catalog) })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(&expand_path(path), config.writer_heap_bytes),
            None => Ok(Self::in_ram(config.writer_heap_bytes)),
        }
    }

    fn persist_aliases(&self, aliases: &AliasTable) -> Result<()> {
        let Some(root) = &self.root else { return Ok(()) };
        let tmp = root.join(format!("{ALIAS_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(aliases)?)?;
        fs::rename(&tmp, root.join(ALIAS_FILE))?;
        Ok(())
    }

    fn resolve(&self, target: &str) -> Result<Vec<Arc<StoreIndex>>> {
        let catalog = self.catalog.read();
        if let Some(index) = catalog.indices.get(target) {
            return Ok(vec![index.clone()]);
        }
        let found: Vec<_> = catalog
            .aliases
            .resolve(target)
            .iter()
            .filter_map(|name| catalog.indices.get(name).cloned())
            .collect();
        if found.is_empty() {
            return Err(SuggestError::NotFound(format!("index or alias '{target}'")));
        }
        Ok(found)
    }

    fn resolve_one(&self, target: &str) -> Result<Arc<StoreIndex>> {
        let mut found = self.resolve(target)?;
        if found.len() != 1 {
            let indices = self.catalog.read().aliases.resolve(target);
            return Err(SuggestError::AliasConflict { alias: target.to_string(), indices });
        }
        Ok(found.remove(0))
    }
}

#[async_trait]
impl SuggestBackend for TantivyBackend {
    async fn create_index(&self, name: &str, aliases: &[String]) -> Result<()> {
        let mut catalog = self.catalog.write();
        if catalog.indices.contains_key(name) || catalog.aliases.contains(name) {
            return Err(SuggestError::Operation(format!("index '{name}' already exists")));
        }
        let index = match &self.root {
            Some(root) => {
                let dir = root.join(name);
                fs::create_dir_all(&dir)?;
                Index::create_in_dir(&dir, build_schema()).map_err(store_err)?
            }
            None => Index::create_in_ram(build_schema()),
        };
        catalog
            .indices
            .insert(name.to_string(), Arc::new(StoreIndex::from_index(index, self.writer_heap_bytes)?));
        for alias in aliases {
            catalog.aliases.attach(name, alias);
        }
        self.persist_aliases(&catalog.aliases)?;
        tracing::debug!(index = name, ?aliases, "created index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut catalog = self.catalog.write();
        if catalog.indices.remove(name).is_none() {
            return Err(SuggestError::NotFound(format!("index '{name}'")));
        }
        catalog.aliases.detach_index(name);
        self.persist_aliases(&catalog.aliases)?;
        if let Some(root) = &self.root {
            fs::remove_dir_all(root.join(name))?;
        }
        tracing::debug!(index = name, "deleted index");
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let catalog = self.catalog.read();
        Ok(catalog.indices.keys().filter(|n| n.starts_with(prefix)).cloned().collect())
    }

    async fn exists(&self, target: &str) -> Result<bool> {
        let catalog = self.catalog.read();
        Ok(catalog.indices.contains_key(target) || catalog.aliases.contains(target))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>> {
        Ok(self.catalog.read().aliases.resolve(alias))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut catalog = self.catalog.write();
        let Catalog { indices, aliases } = &mut *catalog;
        aliases.apply(actions, |name| indices.contains_key(name))?;
        self.persist_aliases(aliases)
    }

    async fn get(&self, target: &str, ids: &[String]) -> Result<Vec<Record>> {
        let indices = self.resolve(target)?;
        let mut out = Vec::new();
        for id in ids {
            for index in &indices {
                if let Some(record) = index.get(id)? {
                    out.push(record);
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn bulk(&self, target: &str, ops: Vec<BulkOp>) -> Result<BulkResponse> {
        Ok(self.resolve_one(target)?.bulk(ops))
    }

    async fn delete_by_query(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        self.resolve_one(target)?.delete_by_query(query)
    }

    async fn search(&self, target: &str, request: &SearchRequest) -> Result<SearchHits> {
        let mut candidates = Vec::new();
        for index in self.resolve(target)? {
            candidates.extend(index.committed(&request.query)?);
        }
        Ok(execute(candidates, request))
    }

    async fn count(&self, target: &str, query: &QueryExpr) -> Result<u64> {
        let mut total = 0;
        for index in self.resolve(target)? {
            total += index.committed(query)?.len() as u64;
        }
        Ok(total)
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        for index in self.resolve(target)? {
            index.refresh()?;
        }
        Ok(())
    }
}
