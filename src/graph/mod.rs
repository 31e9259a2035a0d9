//! Arena-backed directed graph container.
//!
//! Vertices and edges live in dense vectors addressed by integer handles.
//! Adjacency is kept per vertex in both directions, every vertex payload is
//! indexed by its key, and every edge is indexed by its `(src, dst)` pair so
//! that at most one edge exists between an ordered pair of vertices.

use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::{MarkovError, Result};

/// Handle to a vertex inside a [`DirectedGraph`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VertexId(pub u32);

/// Handle to an edge inside a [`DirectedGraph`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u32);

impl VertexId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Vertex payloads expose the identity used for keyed lookup.
pub trait Keyed {
    /// Identity type. Two payloads with equal keys are the same vertex.
    type Key: Clone + Eq + Hash + fmt::Debug;

    /// Returns the identity of this payload.
    fn key(&self) -> Self::Key;
}

type Adjacency = SmallVec<[EdgeId; 4]>;

/// Edge record: endpoints plus payload.
#[derive(Clone, Debug)]
pub struct EdgeEntry<E> {
    /// Source vertex.
    pub src: VertexId,
    /// Destination vertex.
    pub dst: VertexId,
    /// Edge payload.
    pub payload: E,
}

/// Directed graph with keyed vertices and at most one edge per ordered pair.
#[derive(Clone, Debug)]
pub struct DirectedGraph<V: Keyed, E> {
    vertices: Vec<V>,
    edges: Vec<EdgeEntry<E>>,
    out_adj: Vec<Adjacency>,
    in_adj: Vec<Adjacency>,
    key_index: FxHashMap<V::Key, VertexId>,
    edge_index: FxHashMap<(VertexId, VertexId), EdgeId>,
}

impl<V: Keyed, E> Default for DirectedGraph<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Keyed, E> DirectedGraph<V, E> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            out_adj: Vec::new(),
            in_adj: Vec::new(),
            key_index: FxHashMap::default(),
            edge_index: FxHashMap::default(),
        }
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Inserts a vertex. Fails if a vertex with the same key is present.
    pub fn add_vertex(&mut self, vertex: V) -> Result<VertexId> {
        let key = vertex.key();
        if self.key_index.contains_key(&key) {
            return Err(MarkovError::Invariant(format!(
                "vertex {key:?} already present"
            )));
        }
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(vertex);
        self.out_adj.push(Adjacency::new());
        self.in_adj.push(Adjacency::new());
        self.key_index.insert(key, id);
        Ok(id)
    }

    /// Inserts an edge between two existing vertices.
    ///
    /// Fails if either endpoint is unknown or an edge already joins the pair.
    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, payload: E) -> Result<EdgeId> {
        self.check_vertex(src)?;
        self.check_vertex(dst)?;
        if self.edge_index.contains_key(&(src, dst)) {
            return Err(MarkovError::Invariant(format!(
                "edge {src} -> {dst} already present"
            )));
        }
        let id = self.push_edge(src, dst, payload);
        self.edge_index.insert((src, dst), id);
        Ok(id)
    }

    fn push_edge(&mut self, src: VertexId, dst: VertexId, payload: E) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(EdgeEntry { src, dst, payload });
        self.out_adj[src.index()].push(id);
        self.in_adj[dst.index()].push(id);
        id
    }

    /// Appends an edge without consulting the pair index. Test-only hook for
    /// building graphs that violate edge uniqueness.
    #[cfg(test)]
    pub(crate) fn push_edge_unchecked(&mut self, src: VertexId, dst: VertexId, payload: E) -> EdgeId {
        self.push_edge(src, dst, payload)
    }

    fn check_vertex(&self, id: VertexId) -> Result<()> {
        if id.index() < self.vertices.len() {
            Ok(())
        } else {
            Err(MarkovError::Invariant(format!("unknown vertex {id}")))
        }
    }

    /// Returns whether the handle refers to a vertex in this graph.
    pub fn contains_vertex(&self, id: VertexId) -> bool {
        id.index() < self.vertices.len()
    }

    /// Looks up a vertex by key.
    pub fn find_vertex(&self, key: &V::Key) -> Option<VertexId> {
        self.key_index.get(key).copied()
    }

    /// Looks up the edge joining `src` to `dst`.
    pub fn find_edge(&self, src: VertexId, dst: VertexId) -> Option<EdgeId> {
        self.edge_index.get(&(src, dst)).copied()
    }

    /// Vertex payload.
    pub fn vertex(&self, id: VertexId) -> Option<&V> {
        self.vertices.get(id.index())
    }

    /// Mutable vertex payload. Keys must not be altered through this handle.
    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut V> {
        self.vertices.get_mut(id.index())
    }

    /// Edge record.
    pub fn edge(&self, id: EdgeId) -> Option<&EdgeEntry<E>> {
        self.edges.get(id.index())
    }

    /// Mutable edge payload.
    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut E> {
        self.edges.get_mut(id.index()).map(|entry| &mut entry.payload)
    }

    /// Outgoing edges of a vertex, in insertion order.
    pub fn out_edges(&self, id: VertexId) -> &[EdgeId] {
        self.out_adj.get(id.index()).map(|adj| adj.as_slice()).unwrap_or(&[])
    }

    /// Incoming edges of a vertex, in insertion order.
    pub fn in_edges(&self, id: VertexId) -> &[EdgeId] {
        self.in_adj.get(id.index()).map(|adj| adj.as_slice()).unwrap_or(&[])
    }

    /// Destinations reachable over one outgoing edge.
    pub fn successors(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.out_edges(id).iter().map(move |e| self.edges[e.index()].dst)
    }

    /// Sources with an edge into the vertex.
    pub fn predecessors(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.in_edges(id).iter().map(move |e| self.edges[e.index()].src)
    }

    /// The endpoint of `edge` that is not `vertex`.
    pub fn opposite(&self, vertex: VertexId, edge: EdgeId) -> Option<VertexId> {
        let entry = self.edges.get(edge.index())?;
        if entry.src == vertex {
            Some(entry.dst)
        } else if entry.dst == vertex {
            Some(entry.src)
        } else {
            None
        }
    }

    /// All vertex handles in insertion order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + ExactSizeIterator {
        (0..self.vertices.len() as u32).map(VertexId)
    }

    /// All edge handles in insertion order.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + ExactSizeIterator {
        (0..self.edges.len() as u32).map(EdgeId)
    }

    /// Iterates `(handle, payload)` pairs.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &V)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexId(i as u32), v))
    }

    /// Iterates `(handle, record)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &EdgeEntry<E>)> {
        self.edges
            .iter()
            .enumerate()
            .map(|(i, e)| (EdgeId(i as u32), e))
    }

    /// Mutable access to every vertex payload.
    pub fn vertices_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.vertices.iter_mut()
    }

    /// Mutable access to every edge payload.
    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut E> {
        self.edges.iter_mut().map(|entry| &mut entry.payload)
    }
}
