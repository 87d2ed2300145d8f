use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use batchline_types::rules::RuleDefinitions;
use batchline_types::state::{PipelineId, Revision};
use sha2::{Digest, Sha256};

use super::{RuleStore, RuleStoreError};

/// File name of the rules document inside a revision directory.
pub const RULES_FILE_NAME: &str = "rules.json";

struct CachedRules {
    digest: Option<[u8; 32]>,
    rules: Arc<RuleDefinitions>,
}

/// Reads `<root>/<pipeline>/<revision>/rules.json`.
///
/// The parsed snapshot is cached per file together with the SHA-256 of the
/// bytes it was parsed from, and is only re-parsed when the content changes.
/// A missing file is an empty snapshot.
pub struct FileRuleStore {
    root: PathBuf,
    cache: Mutex<HashMap<PathBuf, CachedRules>>,
}

impl FileRuleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the rules file of a pipeline revision.
    #[must_use]
    pub fn rules_path(&self, pipeline: &PipelineId, revision: &Revision) -> PathBuf {
        self.root
            .join(pipeline.as_str())
            .join(revision.as_str())
            .join(RULES_FILE_NAME)
    }
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, RuleStoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RuleStoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_rules(path: &Path, bytes: &[u8]) -> Result<RuleDefinitions, RuleStoreError> {
    serde_json::from_slice(bytes).map_err(|source| RuleStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl RuleStore for FileRuleStore {
    fn retrieve_rules(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> Result<Arc<RuleDefinitions>, RuleStoreError> {
        let path = self.rules_path(pipeline, revision);
        let bytes = read_bytes(&path)?;
        let digest: Option<[u8; 32]> = bytes.as_deref().map(|b| Sha256::digest(b).into());

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| RuleStoreError::Unavailable("rule cache lock poisoned".into()))?;
        if let Some(cached) = cache.get(&path) {
            if cached.digest == digest {
                return Ok(Arc::clone(&cached.rules));
            }
        }

        let rules = match &bytes {
            Some(bytes) => {
                tracing::debug!(path = %path.display(), "Parsing rule definitions");
                Arc::new(parse_rules(&path, bytes)?)
            }
            None => Arc::new(RuleDefinitions::default()),
        };
        cache.insert(
            path,
            CachedRules {
                digest,
                rules: Arc::clone(&rules),
            },
        );
        Ok(rules)
    }
}

/// Rule store held in memory. Every [`InMemoryRuleStore::publish`] yields a
/// new snapshot instance.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: Mutex<HashMap<(String, String), Arc<RuleDefinitions>>>,
}

impl InMemoryRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rules of a pipeline revision.
    pub fn publish(&self, pipeline: &PipelineId, revision: &Revision, rules: RuleDefinitions) {
        let key = (pipeline.as_str().to_string(), revision.as_str().to_string());
        match self.rules.lock() {
            Ok(mut map) => {
                map.insert(key, Arc::new(rules));
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, Arc::new(rules));
            }
        }
    }
}

impl RuleStore for InMemoryRuleStore {
    fn retrieve_rules(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> Result<Arc<RuleDefinitions>, RuleStoreError> {
        let mut map = self
            .rules
            .lock()
            .map_err(|_| RuleStoreError::Unavailable("rule map lock poisoned".into()))?;
        let key = (pipeline.as_str().to_string(), revision.as_str().to_string());
        Ok(Arc::clone(map.entry(key).or_default()))
    }
}
