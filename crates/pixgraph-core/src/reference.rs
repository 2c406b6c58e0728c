//! Cross-document references: which nodes depend on which external file.

use crate::id::{DocumentId, NodeId, ReferenceId};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReference {
    pub id: ReferenceId,
    pub path: PathBuf,
    pub dependents: BTreeSet<(DocumentId, NodeId)>,
}

/// Registry of references shared by the open documents. Owned by the
/// application shell and passed where needed.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    references: HashMap<ReferenceId, DocumentReference>,
    by_path: HashMap<PathBuf, ReferenceId>,
}

impl ReferenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Reference for `path`, created on first use.
    pub fn register(&mut self, path: impl AsRef<Path>) -> ReferenceId {
        let path = path.as_ref();
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }
        let id = ReferenceId::new();
        self.by_path.insert(path.to_path_buf(), id);
        self.references.insert(
            id,
            DocumentReference {
                id,
                path: path.to_path_buf(),
                dependents: BTreeSet::new(),
            },
        );
        id
    }

    pub fn get(&self, id: ReferenceId) -> Option<&DocumentReference> {
        self.references.get(&id)
    }

    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<&DocumentReference> {
        let id = self.by_path.get(path.as_ref())?;
        self.references.get(id)
    }

    /// Returns `false` if the reference does not exist.
    pub fn add_dependent(&mut self, id: ReferenceId, document: DocumentId, node: NodeId) -> bool {
        match self.references.get_mut(&id) {
            Some(reference) => {
                reference.dependents.insert((document, node));
                true
            }
            None => false,
        }
    }

    /// Drop one dependent; the reference goes with its last dependent.
    pub fn remove_dependent(&mut self, id: ReferenceId, document: DocumentId, node: NodeId) {
        let Some(reference) = self.references.get_mut(&id) else {
            return;
        };
        reference.dependents.remove(&(document, node));
        if reference.dependents.is_empty() {
            self.drop_reference(id);
        }
    }

    /// Forget every dependent that lives in `document` (on close).
    pub fn remove_document(&mut self, document: DocumentId) {
        let mut empty = Vec::new();
        for reference in self.references.values_mut() {
            reference.dependents.retain(|(doc, _)| *doc != document);
            if reference.dependents.is_empty() {
                empty.push(reference.id);
            }
        }
        for id in empty {
            self.drop_reference(id);
        }
    }

    /// Nodes to invalidate when the file at `path` changes.
    pub fn dependents_of(&self, path: impl AsRef<Path>) -> Vec<(DocumentId, NodeId)> {
        self.find_by_path(path)
            .map(|r| r.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    fn drop_reference(&mut self, id: ReferenceId) {
        if let Some(reference) = self.references.remove(&id) {
            self.by_path.remove(&reference.path);
            log::debug!("reference to {} dropped", reference.path.display());
        }
    }
}
