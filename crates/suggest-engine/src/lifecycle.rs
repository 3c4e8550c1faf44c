//! Blue/green index generations behind the search and update aliases.
//!
//! Physical indices are named `<id>.<yyyyMMddHHmmssSSS>`. Readers only ever
//! see the search alias and writers the update alias; rollover is
//! `create_next`, fill, `switch_index`, `remove_disabled`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use suggest_core::config::SuggestConfig;
use suggest_core::error::{Result, SuggestError};
use suggest_core::traits::{AliasAction, SuggestBackend};

use crate::deadline::with_deadline;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const STAMP_LEN: usize = 17;
const NAME_ATTEMPTS: usize = 100;

pub struct IndexLifecycle {
    backend: Arc<dyn SuggestBackend>,
    id: String,
    search_alias: String,
    update_alias: String,
    timeout: Duration,
}

impl IndexLifecycle {
    pub fn new(backend: Arc<dyn SuggestBackend>, config: &SuggestConfig) -> Self {
        Self {
            backend,
            id: config.id.clone(),
            search_alias: config.search_alias(),
            update_alias: config.update_alias(),
            timeout: config.timeouts.admin(),
        }
    }

    pub fn search_alias(&self) -> &str {
        &self.search_alias
    }

    pub fn update_alias(&self) -> &str {
        &self.update_alias
    }

    /// True for names this suggestion set generated.
    pub fn is_generation(&self, name: &str) -> bool {
        name.strip_prefix(&self.id)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|stamp| stamp.len() == STAMP_LEN && stamp.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Every physical generation of this suggestion set, oldest first.
    pub async fn indices(&self) -> Result<Vec<String>> {
        let prefix = format!("{}.", self.id);
        let mut names: Vec<String> =
            with_deadline("lifecycle.list", self.timeout, self.backend.list_indices(&prefix))
                .await?
                .into_iter()
                .filter(|n| self.is_generation(n))
                .collect();
        names.sort();
        Ok(names)
    }

    /// Create the first generation with both aliases when none exists.
    pub async fn create_if_nothing(&self) -> Result<bool> {
        if !self.indices().await?.is_empty() {
            return Ok(false);
        }
        let name = self.unused_name().await?;
        let aliases = [self.search_alias.clone(), self.update_alias.clone()];
        with_deadline("lifecycle.create", self.timeout, self.backend.create_index(&name, &aliases)).await?;
        info!(index = %name, "created initial suggest index");
        Ok(true)
    }

    /// Create a new generation and point the update alias at it. The search
    /// alias is left alone unless nothing is attached to it yet.
    pub async fn create_next(&self) -> Result<String> {
        let previous = self.resolve(&self.update_alias).await?;
        if previous.len() > 1 {
            return Err(self.conflict(&self.update_alias, previous));
        }
        let serving = self.resolve(&self.search_alias).await?;

        let name = self.unused_name().await?;
        with_deadline("lifecycle.create", self.timeout, self.backend.create_index(&name, &[])).await?;

        let mut actions: Vec<AliasAction> = previous
            .iter()
            .map(|index| AliasAction::Remove { index: index.clone(), alias: self.update_alias.clone() })
            .collect();
        actions.push(AliasAction::Add { index: name.clone(), alias: self.update_alias.clone() });
        if serving.is_empty() {
            actions.push(AliasAction::Add { index: name.clone(), alias: self.search_alias.clone() });
        }
        with_deadline("lifecycle.aliases", self.timeout, self.backend.update_aliases(&actions)).await?;
        info!(index = %name, previous = ?previous, "update alias moved to new generation");
        Ok(name)
    }

    /// Point the search alias wherever the update alias points. Returns
    /// false when they already coincide.
    pub async fn switch_index(&self) -> Result<bool> {
        let update = self.resolve_exactly_one(&self.update_alias).await?;
        let search = self.resolve_exactly_one(&self.search_alias).await?;
        if update == search {
            return Ok(false);
        }
        let actions = [
            AliasAction::Remove { index: search.clone(), alias: self.search_alias.clone() },
            AliasAction::Add { index: update.clone(), alias: self.search_alias.clone() },
        ];
        with_deadline("lifecycle.aliases", self.timeout, self.backend.update_aliases(&actions)).await?;
        info!(from = %search, to = %update, "search alias switched");
        Ok(true)
    }

    /// Delete every generation attached to neither alias.
    pub async fn remove_disabled(&self) -> Result<Vec<String>> {
        let mut attached = self.resolve(&self.search_alias).await?;
        attached.extend(self.resolve(&self.update_alias).await?);
        let mut removed = Vec::new();
        for name in self.indices().await? {
            if attached.contains(&name) {
                continue;
            }
            with_deadline("lifecycle.delete", self.timeout, self.backend.delete_index(&name)).await?;
            info!(index = %name, "removed disabled suggest index");
            removed.push(name);
        }
        Ok(removed)
    }

    async fn resolve(&self, alias: &str) -> Result<Vec<String>> {
        with_deadline("lifecycle.resolve", self.timeout, self.backend.resolve_alias(alias)).await
    }

    async fn resolve_exactly_one(&self, alias: &str) -> Result<String> {
        let mut indices = self.resolve(alias).await?;
        if indices.len() != 1 {
            return Err(self.conflict(alias, indices));
        }
        Ok(indices.remove(0))
    }

    fn conflict(&self, alias: &str, indices: Vec<String>) -> SuggestError {
        error!(alias, indices = ?indices, "alias must resolve to exactly one index");
        SuggestError::AliasConflict { alias: alias.to_string(), indices }
    }

    async fn unused_name(&self) -> Result<String> {
        for _ in 0..NAME_ATTEMPTS {
            let name = format!("{}.{}", self.id, Utc::now().format(STAMP_FORMAT));
            if !with_deadline("lifecycle.exists", self.timeout, self.backend.exists(&name)).await? {
                return Ok(name);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Err(SuggestError::Operation(format!("no free index name for '{}'", self.id)))
    }
}
