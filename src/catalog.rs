//! Name interning for topics, levels and hosts.
//!
//! Chunk records store small integer ids; the catalog maps them back to
//! names. Ids start at 1 and are never reused.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::metadata::write_atomic;
use crate::{Error, Result};

const CATALOG_VERSION: u32 = 1;
const CATALOG_FILENAME: &str = "catalog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Topic,
    Level,
    Host,
}

impl KeyKind {
    fn slot(self) -> usize {
        match self {
            KeyKind::Topic => 0,
            KeyKind::Level => 1,
            KeyKind::Host => 2,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyKind::Topic => "topic",
            KeyKind::Level => "level",
            KeyKind::Host => "host",
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    topics: Vec<String>,
    levels: Vec<String>,
    hosts: Vec<String>,
}

impl CatalogFile {
    fn names(&self, kind: KeyKind) -> &Vec<String> {
        match kind {
            KeyKind::Topic => &self.topics,
            KeyKind::Level => &self.levels,
            KeyKind::Host => &self.hosts,
        }
    }

    fn names_mut(&mut self, kind: KeyKind) -> &mut Vec<String> {
        match kind {
            KeyKind::Topic => &mut self.topics,
            KeyKind::Level => &mut self.levels,
            KeyKind::Host => &mut self.hosts,
        }
    }
}

#[derive(Default)]
struct CatalogState {
    file: CatalogFile,
    ids: [HashMap<String, u32>; 3],
}

pub struct Catalog {
    path: PathBuf,
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Load `_table/catalog.json` under `table_root`, starting empty if absent.
    pub fn open(table_root: &Path) -> Result<Self> {
        let path = table_root.join("_table").join(CATALOG_FILENAME);
        let file = match fs::read(&path) {
            Ok(bytes) => {
                let file: CatalogFile = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::CorruptMetadata(format!("{}: {e}", path.display())))?;
                if file.version != CATALOG_VERSION {
                    return Err(Error::UnsupportedVersion(file.version));
                }
                file
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CatalogFile {
                version: CATALOG_VERSION,
                ..CatalogFile::default()
            },
            Err(err) => return Err(err.into()),
        };

        let mut state = CatalogState {
            file,
            ids: Default::default(),
        };
        for kind in [KeyKind::Topic, KeyKind::Level, KeyKind::Host] {
            let names = state.file.names(kind).clone();
            for (idx, name) in names.into_iter().enumerate() {
                let id = id_for_index(idx)?;
                if state.ids[kind.slot()].insert(name, id).is_some() {
                    return Err(Error::CorruptMetadata(format!("duplicate {kind} in catalog")));
                }
            }
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Id for `name`, assigning and persisting a new one if needed.
    pub fn intern(&self, kind: KeyKind, name: &str) -> Result<u32> {
        if let Some(id) = self.lookup(kind, name)? {
            return Ok(id);
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| Error::Corrupt("catalog lock poisoned"))?;
        if let Some(id) = state.ids[kind.slot()].get(name) {
            return Ok(*id);
        }

        let id = id_for_index(state.file.names(kind).len())?;
        state.file.names_mut(kind).push(name.to_string());
        if let Err(err) = self.persist(&state.file) {
            state.file.names_mut(kind).pop();
            return Err(err);
        }
        state.ids[kind.slot()].insert(name.to_string(), id);
        debug!("interned {kind} '{name}' as {id}");
        Ok(id)
    }

    /// Id for `name` if it has been interned.
    pub fn lookup(&self, kind: KeyKind, name: &str) -> Result<Option<u32>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Corrupt("catalog lock poisoned"))?;
        Ok(state.ids[kind.slot()].get(name).copied())
    }

    pub fn name(&self, kind: KeyKind, id: u32) -> Result<String> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Corrupt("catalog lock poisoned"))?;
        (id as usize)
            .checked_sub(1)
            .and_then(|idx| state.file.names(kind).get(idx))
            .cloned()
            .ok_or_else(|| Error::CorruptMetadata(format!("unknown {kind} id {id}")))
    }

    /// All names of `kind`, in id order.
    pub fn names(&self, kind: KeyKind) -> Result<Vec<String>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Corrupt("catalog lock poisoned"))?;
        Ok(state.file.names(kind).clone())
    }

    /// Ids of every name of `kind` accepted by `matches`.
    pub fn ids_matching(&self, kind: KeyKind, matches: impl Fn(&str) -> bool) -> Result<Vec<u32>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Corrupt("catalog lock poisoned"))?;
        Ok(state.ids[kind.slot()]
            .iter()
            .filter(|(name, _)| matches(name))
            .map(|(_, id)| *id)
            .collect())
    }

    fn persist(&self, file: &CatalogFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_vec_pretty(file).map_err(|e| Error::CorruptMetadata(e.to_string()))?;
        write_atomic(&self.path, &json)
    }
}

fn id_for_index(idx: usize) -> Result<u32> {
    u32::try_from(idx + 1).map_err(|_| Error::CorruptMetadata("catalog id overflow".into()))
}
