//! Flat-file persistence and the mapped read path.
//!
//! A saved index is the node table, byte for byte: `n_nodes` fixed-stride
//! records, no header, no magic. Roots are recoverable because the builder
//! appends a copy of every root at the tail and forces each root's
//! descendant count to the total item count — so the file ends in a maximal
//! run of nodes sharing one descendant count, and that count *is* the item
//! count. Loading maps the file read-only; queries then share pages across
//! processes.

use std::fs::File;
use std::io::Write;
use std::mem;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{CopseError, Result};
use crate::metric::Metric;
use crate::node::{NodeAccess, NodeArena, NodeLayout, NodeRef};
use crate::random::RandomSource;

use super::ForestIndex;

/// The node table, in whichever representation the index currently holds.
pub(crate) enum NodeStore {
    /// Growable build-time arena.
    Arena(NodeArena),
    /// Read-only mapped index file.
    Mapped(MappedNodes),
}

impl NodeStore {
    pub fn node(&self, id: u32) -> NodeRef<'_> {
        match self {
            NodeStore::Arena(arena) => arena.node(id),
            NodeStore::Mapped(mapped) => mapped.node(id),
        }
    }

    pub fn arena_mut(&mut self) -> &mut NodeArena {
        match self {
            NodeStore::Arena(arena) => arena,
            NodeStore::Mapped(_) => panic!("node table is memory-mapped"),
        }
    }

    pub fn take_arena(&mut self, layout: NodeLayout) -> NodeArena {
        match mem::replace(self, NodeStore::Arena(NodeArena::new(layout))) {
            NodeStore::Arena(arena) => arena,
            NodeStore::Mapped(_) => panic!("node table is memory-mapped"),
        }
    }
}

/// Read-only node table backed by a memory-mapped index file.
pub(crate) struct MappedNodes {
    mmap: Mmap,
    layout: NodeLayout,
    n_nodes: u32,
}

impl MappedNodes {
    pub fn open(path: &Path, layout: NodeLayout) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the index file is not
        // modified while mapped; truncation during use would fault, as with
        // any mapped file.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() % layout.node_size() != 0 {
            return Err(CopseError::Format(format!(
                "file size {} is not a multiple of node size {}",
                mmap.len(),
                layout.node_size(),
            )));
        }
        let n_nodes = (mmap.len() / layout.node_size()) as u32;
        Ok(Self {
            mmap,
            layout,
            n_nodes,
        })
    }

    pub fn n_nodes(&self) -> u32 {
        self.n_nodes
    }
}

impl NodeAccess for MappedNodes {
    fn layout(&self) -> NodeLayout {
        self.layout
    }

    fn node(&self, id: u32) -> NodeRef<'_> {
        assert!(id < self.n_nodes, "node id {id} out of bounds");
        let start = id as usize * self.layout.node_size();
        NodeRef::new(&self.mmap[start..start + self.layout.node_size()], self.layout)
    }
}

impl<M: Metric, R: RandomSource + Send + Sync> ForestIndex<M, R> {
    /// Write the node table to `path` and reopen it memory-mapped.
    ///
    /// Saving always transitions the index into the mapped representation;
    /// there is no "built but unsaved" steady state afterwards.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if !self.built {
            return Err(CopseError::InvalidState(
                "can't save an index that hasn't been built".into(),
            ));
        }
        if self.loaded {
            return Err(CopseError::InvalidState(
                "index is already saved and mapped".into(),
            ));
        }

        let path = path.as_ref();
        {
            let arena = match &self.store {
                NodeStore::Arena(arena) => arena,
                NodeStore::Mapped(_) => unreachable!("loaded state checked above"),
            };
            let mut file = File::create(path)?;
            file.write_all(arena.bytes(self.n_nodes))?;
        }
        if self.verbose {
            debug!(path = %path.display(), n_nodes = self.n_nodes, "index saved");
        }

        self.load(path)
    }

    /// Map an index file read-only and recover roots and item count from
    /// its tail.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close();

        let path = path.as_ref();
        let mapped = MappedNodes::open(path, self.layout)?;
        let n_nodes = mapped.n_nodes();

        // Roots are the maximal trailing run of equal descendant counts.
        let mut roots = Vec::new();
        let mut count = 0u32;
        for id in (0..n_nodes).rev() {
            let descendants = mapped.node(id).descendant_count();
            if roots.is_empty() || descendants == count {
                roots.push(id);
                count = descendants;
            } else {
                break;
            }
        }

        // The last tree root built sits just before its own appended copy,
        // so the run can overshoot by one; drop the duplicate boundary
        // entry.
        if roots.len() > 1 {
            let first = mapped.node(roots[0]).split_children()[0];
            let last = mapped.node(roots[roots.len() - 1]).split_children()[0];
            if first == last {
                roots.pop();
            }
        }

        self.store = NodeStore::Mapped(mapped);
        self.n_nodes = n_nodes;
        self.n_items = count;
        self.roots = roots;
        self.built = true;
        self.loaded = true;
        self.refresh_batch_bound();

        if self.verbose {
            debug!(
                path = %path.display(),
                n_nodes,
                n_items = self.n_items,
                roots = self.roots.len(),
                "index loaded"
            );
        }
        Ok(())
    }
}
