//! Build graph and topological ordering.
//!
//! Resolved modules live in one deduplicated pool ([`BuildGraph`]) keyed by
//! [`ModuleRef`]; dependency edges are [`NodeId`]s into that same pool, so a
//! graph can never hold a dangling reference.
//!
//! Both orderings share one traversal: depth-first, post-order, with a
//! visited set that is never cleared mid-traversal. A back-edge to a node
//! already on the stack is simply skipped, so cycles are tolerated rather
//! than rejected. Use [`BuildGraph::find_cycles`] to report them.

use cpm_schema::ModuleRef;
use std::collections::HashMap;

use crate::error::Result;
use crate::mvs::Requirements;

/// Index of a module inside a [`BuildGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in insertion order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A module together with its direct dependencies.
#[derive(Debug, Clone)]
pub struct BuildModule {
    pub module: ModuleRef,
    deps: Vec<NodeId>,
}

impl BuildModule {
    pub fn deps(&self) -> &[NodeId] {
        &self.deps
    }
}

/// Deduplicated pool of modules with direct-dependency edges.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    nodes: Vec<BuildModule>,
    index: HashMap<ModuleRef, NodeId>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of a resolved build list.
    ///
    /// Each module's requirements are remapped onto the version selected for
    /// their path. Requirements on paths outside the list are dropped, as are
    /// requirements on a module's own path.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Requirements::required`].
    pub fn from_build_list<R>(list: &[ModuleRef], reqs: &R) -> Result<Self>
    where
        R: Requirements + ?Sized,
    {
        let mut graph = Self::new();
        let mut by_path: HashMap<&str, NodeId> = HashMap::new();
        for module in list {
            let id = graph.add_module(module.clone());
            by_path.insert(module.path.as_str(), id);
        }

        for module in list {
            let from = by_path[module.path.as_str()];
            for dep in reqs.required(module)? {
                if dep.is_none() || dep.path == module.path {
                    continue;
                }
                if let Some(&to) = by_path.get(dep.path.as_str()) {
                    graph.add_dep(from, to);
                }
            }
        }
        Ok(graph)
    }

    /// Insert `module`, returning the existing node if it is already present.
    pub fn add_module(&mut self, module: ModuleRef) -> NodeId {
        if let Some(&id) = self.index.get(&module) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(module.clone(), id);
        self.nodes.push(BuildModule {
            module,
            deps: Vec::new(),
        });
        id
    }

    /// Record that `from` depends on `to`. Duplicate edges are ignored.
    ///
    /// # Panics
    ///
    /// Panics if either id does not belong to this graph.
    pub fn add_dep(&mut self, from: NodeId, to: NodeId) {
        assert!(to.0 < self.nodes.len(), "dependency {to:?} is not in this graph");
        let deps = &mut self.nodes[from.0].deps;
        if !deps.contains(&to) {
            deps.push(to);
        }
    }

    pub fn node(&self, id: NodeId) -> &BuildModule {
        &self.nodes[id.0]
    }

    pub fn module(&self, id: NodeId) -> &ModuleRef {
        &self.nodes[id.0].module
    }

    pub fn id_of(&self, module: &ModuleRef) -> Option<NodeId> {
        self.index.get(module).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Order `modules` so that every dependency precedes its dependents.
    ///
    /// Dependencies reachable from `modules` are included even if not listed.
    /// Every module appears exactly once; cycles are broken at the back-edge.
    pub fn global_build_order(&self, modules: &[NodeId]) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for &id in modules {
            self.visit(id, &mut visited, &mut order);
        }
        order
    }

    /// [`Self::global_build_order`] over every node in insertion order.
    pub fn build_order(&self) -> Vec<NodeId> {
        let all: Vec<NodeId> = self.ids().collect();
        self.global_build_order(&all)
    }

    /// Everything `id` transitively depends on, dependencies first.
    /// `id` itself is never part of its own closure.
    pub fn transitive_closure_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        visited[id.0] = true;
        let mut order = Vec::new();
        for &dep in &self.nodes[id.0].deps {
            self.visit(dep, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, id: NodeId, visited: &mut [bool], order: &mut Vec<NodeId>) {
        if visited[id.0] {
            return;
        }
        visited[id.0] = true;
        for &dep in &self.nodes[id.0].deps {
            self.visit(dep, visited, order);
        }
        order.push(id);
    }

    /// Groups of modules that depend on each other (strongly connected
    /// components with more than one member, or a self-edge).
    pub fn find_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut tarjan = Tarjan {
            graph: self,
            next_index: 0,
            index: vec![None; self.nodes.len()],
            lowlink: vec![0; self.nodes.len()],
            on_stack: vec![false; self.nodes.len()],
            stack: Vec::new(),
            cycles: Vec::new(),
        };
        for id in self.ids() {
            if tarjan.index[id.0].is_none() {
                tarjan.connect(id);
            }
        }
        tarjan.cycles
    }
}

struct Tarjan<'a> {
    graph: &'a BuildGraph,
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    cycles: Vec<Vec<NodeId>>,
}

impl Tarjan<'_> {
    fn connect(&mut self, v: NodeId) {
        self.index[v.0] = Some(self.next_index);
        self.lowlink[v.0] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v.0] = true;

        let graph = self.graph;
        for &w in &graph.nodes[v.0].deps {
            match self.index[w.0] {
                None => {
                    self.connect(w);
                    self.lowlink[v.0] = self.lowlink[v.0].min(self.lowlink[w.0]);
                }
                Some(w_index) if self.on_stack[w.0] => {
                    self.lowlink[v.0] = self.lowlink[v.0].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v.0]) == self.index[v.0] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w.0] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            let self_edge = graph.nodes[v.0].deps.contains(&v);
            if component.len() > 1 || self_edge {
                component.sort();
                self.cycles.push(component);
            }
        }
    }
}
