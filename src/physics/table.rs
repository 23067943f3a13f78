use std::collections::HashMap;
use std::sync::Arc;

/// What a committed batch touched; drives matrix reuse during assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Changes {
    pub matrix: bool,
    pub rhs: bool,
}

impl Changes {
    pub fn merge(self, other: Changes) -> Changes {
        Changes {
            matrix: self.matrix || other.matrix,
            rhs: self.rhs || other.rhs,
        }
    }
}

/// Insertion-ordered `label -> entry` map.
#[derive(Clone, Debug)]
pub(crate) struct Table<E> {
    labels: Vec<Arc<str>>,
    entries: Vec<E>,
    index: HashMap<Arc<str>, usize>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<E> Table<E> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, label: &str) -> Option<&E> {
        self.index.get(label).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &E)> {
        self.labels
            .iter()
            .map(|l| l.as_ref())
            .zip(self.entries.iter())
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.entries.clear();
        self.index.clear();
    }

    pub fn stage(&self) -> Staged<'_, E> {
        Staged {
            base: self,
            pending: Vec::new(),
            pending_index: HashMap::new(),
        }
    }

    /// Applies a fully validated batch. New labels are appended in batch order.
    pub fn commit(&mut self, pending: Vec<(Arc<str>, E)>) {
        for (label, entry) in pending {
            match self.index.get(&label) {
                Some(&i) => self.entries[i] = entry,
                None => {
                    self.index.insert(label.clone(), self.entries.len());
                    self.labels.push(label);
                    self.entries.push(entry);
                }
            }
        }
    }
}

/// Copy-on-write view used while validating a batch; nothing reaches the table
/// until every update in the batch has been checked.
pub(crate) struct Staged<'a, E> {
    base: &'a Table<E>,
    pending: Vec<(Arc<str>, E)>,
    pending_index: HashMap<Arc<str>, usize>,
}

impl<E> Staged<'_, E> {
    /// Latest value for `label`, including earlier updates of the same batch.
    pub fn current(&self, label: &str) -> Option<&E> {
        match self.pending_index.get(label) {
            Some(&i) => Some(&self.pending[i].1),
            None => self.base.get(label),
        }
    }

    pub fn put(&mut self, label: Arc<str>, entry: E) {
        match self.pending_index.get(&label) {
            Some(&i) => self.pending[i].1 = entry,
            None => {
                self.pending_index.insert(label.clone(), self.pending.len());
                self.pending.push((label, entry));
            }
        }
    }

    pub fn into_pending(self) -> Vec<(Arc<str>, E)> {
        self.pending
    }
}
