use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SuggestError};
use crate::traits::AliasAction;

/// Alias to physical index bookkeeping shared by the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl AliasTable {
    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn resolve(&self, alias: &str) -> Vec<String> {
        self.aliases.get(alias).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn attach(&mut self, index: &str, alias: &str) {
        self.aliases.entry(alias.to_string()).or_default().insert(index.to_string());
    }

    /// Drop `index` from every alias, removing aliases left empty.
    pub fn detach_index(&mut self, index: &str) {
        for members in self.aliases.values_mut() {
            members.remove(index);
        }
        self.aliases.retain(|_, members| !members.is_empty());
    }

    /// Apply every action or none. `index_exists` validates `Add` targets.
    pub fn apply(&mut self, actions: &[AliasAction], index_exists: impl Fn(&str) -> bool) -> Result<()> {
        let mut next = self.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !index_exists(index) {
                        return Err(SuggestError::NotFound(format!("index '{index}'")));
                    }
                    next.entry(alias.clone()).or_default().insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if !next.get_mut(alias).is_some_and(|m| m.remove(index)) {
                        return Err(SuggestError::NotFound(format!("alias '{alias}' on index '{index}'")));
                    }
                }
            }
        }
        next.retain(|_, members| !members.is_empty());
        self.aliases = next;
        Ok(())
    }
}
