//! The placeholder unification topology.
//!
//! Placeholders live in a dense arena indexed by their integer index.  Each
//! node records its unification edges; aliases between placeholders are a
//! union-find with path compression, the canonical representative always
//! being the lowest index.  Resolution combines the edges of a node with
//! the algebraic calculator, preferring narrow (In) information over wide
//! (Out) information.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use log::trace;

use crate::calculator::{construct_nested, Choice, Choicer, TypeCalculator};
use crate::error::{InferError, Result};
use crate::expr::{Expr, ExprRef, PairKind};

/// Direction of a unification edge relative to its placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polarity {
    /// `ph <== expr`: the expression flows into the placeholder (a lower
    /// bound; narrowing).
    In,
    /// `ph ==> expr`: the placeholder flows out into the expression (an
    /// upper bound; widening).
    Out,
    /// `ph <=> expr`: exact equality.
    Both,
}

/// One unification edge.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unification {
    pub expr: ExprRef,
    pub polarity: Polarity,
}

#[derive(Debug)]
struct Node {
    term: ExprRef,
    edges: Vec<Unification>,
}

/// The arena of placeholder nodes plus the alias union-find.
#[derive(Debug, Default)]
pub(crate) struct Topology {
    nodes: Vec<Node>,
    parent: Vec<usize>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Topology::default()
    }

    /// Register a freshly minted placeholder.  Indexes arrive densely and
    /// in ascending order from the session counter.
    pub(crate) fn register(&mut self, placeholder: &ExprRef) {
        if let Some(index) = placeholder.placeholder_index() {
            if index == self.nodes.len() {
                self.nodes.push(Node {
                    term: placeholder.clone(),
                    edges: Vec::new(),
                });
                self.parent.push(index);
            }
        }
    }

    /// Canonical representative of an index, without path rewriting.
    pub(crate) fn canonical_index(&self, mut index: usize) -> usize {
        if index >= self.parent.len() {
            return index;
        }
        while self.parent[index] != index {
            index = self.parent[index];
        }
        index
    }

    /// Canonical representative with path compression.
    pub(crate) fn find_compress(&mut self, index: usize) -> usize {
        let root = self.canonical_index(index);
        let mut current = index;
        while current < self.parent.len() && self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// The placeholder term of the canonical representative of `index`.
    pub(crate) fn canonical_term(&self, index: usize) -> ExprRef {
        let root = self.canonical_index(index);
        self.nodes[root].term.clone()
    }

    /// Record an alias between two placeholders.  The lower index becomes
    /// canonical; the edges of the absorbed node merge into it, dropping
    /// self-referential equality edges.
    pub(crate) fn alias(&mut self, a: usize, b: usize) {
        let ra = self.find_compress(a);
        let rb = self.find_compress(b);
        if ra == rb {
            return;
        }
        let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
        trace!("alias '{drop} => '{keep}");
        self.parent[drop] = keep;
        let moved = std::mem::take(&mut self.nodes[drop].edges);
        let keep_term = self.nodes[keep].term.clone();
        for unification in moved {
            if unification.polarity == Polarity::Both && *unification.expr == *keep_term {
                continue;
            }
            self.append_edge(keep, unification);
        }
    }

    pub(crate) fn edges(&self, index: usize) -> &[Unification] {
        match self.nodes.get(index) {
            Some(node) => &node.edges,
            None => &[],
        }
    }

    pub(crate) fn edges_snapshot(&self, index: usize) -> Vec<Unification> {
        self.edges(index).to_vec()
    }

    /// Append an edge unless a structurally equal one is present.
    pub(crate) fn append_edge(&mut self, index: usize, unification: Unification) {
        let node = &mut self.nodes[index];
        if !node
            .edges
            .iter()
            .any(|u| u.polarity == unification.polarity && *u.expr == *unification.expr)
        {
            trace!("edge '{index} {:?} {}", unification.polarity, unification.expr);
            node.edges.push(unification);
        }
    }

    pub(crate) fn remove_edge(&mut self, index: usize, unification: &Unification) {
        self.nodes[index]
            .edges
            .retain(|u| !(u.polarity == unification.polarity && *u.expr == *unification.expr));
    }

    /// Rewrite every aliased placeholder inside an expression to its
    /// canonical representative.
    pub(crate) fn replace_alias(&self, expr: &ExprRef) -> ExprRef {
        match expr.placeholder_index() {
            Some(index) => {
                let root = self.canonical_index(index);
                if root == index {
                    expr.clone()
                } else {
                    self.nodes[root].term.clone()
                }
            }
            None => match expr.as_pair() {
                Some((kind, left, right)) => {
                    let l = self.replace_alias(left);
                    let r = self.replace_alias(right);
                    if Rc::ptr_eq(&l, left) && Rc::ptr_eq(&r, right) {
                        expr.clone()
                    } else {
                        Expr::make_pair(kind, l, r)
                    }
                }
                None => expr.clone(),
            },
        }
    }

    /// Canonicalize every edge after inference: aliased placeholders are
    /// rewritten, duplicate edges folded, and self-referential equality
    /// edges dropped.
    pub(crate) fn normalize(&mut self) {
        for index in 0..self.nodes.len() {
            if self.canonical_index(index) != index {
                self.nodes[index].edges.clear();
                continue;
            }
            let term = self.nodes[index].term.clone();
            let edges = std::mem::take(&mut self.nodes[index].edges);
            let mut rewritten: Vec<Unification> = Vec::with_capacity(edges.len());
            for unification in edges {
                let expr = self.replace_alias(&unification.expr);
                if unification.polarity == Polarity::Both && *expr == *term {
                    continue;
                }
                if !rewritten
                    .iter()
                    .any(|u| u.polarity == unification.polarity && *u.expr == *expr)
                {
                    rewritten.push(Unification {
                        expr,
                        polarity: unification.polarity,
                    });
                }
            }
            self.nodes[index].edges = rewritten;
        }
    }

    /// Resolve a placeholder against the topology.
    ///
    /// Narrow information (In and Both edges, combined with And) is
    /// preferred over wide information (Out and Both edges, combined with
    /// Or); two unequal fully concrete resolutions combine with And; a
    /// partially resolved side without term-level placeholders beats one
    /// with them; a bare placeholder only wins over nothing.  `None` keeps
    /// the placeholder as-is.
    pub(crate) fn resolve(
        &self,
        index: usize,
        calculator: &TypeCalculator,
    ) -> Result<Option<ExprRef>> {
        let root = self.canonical_index(index);
        let choicer = TopologyChoicer::new(self, calculator);

        let narrow = self.resolve_directed(
            root,
            Polarity::In,
            PairKind::And,
            calculator,
            &choicer,
            &mut Marker::new(),
        )?;
        let widen = self.resolve_directed(
            root,
            Polarity::Out,
            PairKind::Or,
            calculator,
            &choicer,
            &mut Marker::new(),
        )?;
        trace!(
            "resolve '{index}: narrow={:?} widen={:?}",
            narrow.as_deref(),
            widen.as_deref()
        );

        let narrow_concrete = narrow
            .as_ref()
            .map_or(false, |e| !e.contains_placeholder(true));
        let widen_concrete = widen
            .as_ref()
            .map_or(false, |e| !e.contains_placeholder(true));

        Ok(match (narrow, widen) {
            (Some(n), Some(w)) if narrow_concrete && widen_concrete => {
                if calculator.equals(&n, &w) {
                    Some(n)
                } else {
                    Some(calculator.compute_with(&Expr::and(n, w), &choicer))
                }
            }
            (Some(n), _) if narrow_concrete => Some(n),
            (_, Some(w)) if widen_concrete => Some(w),
            (Some(n), Some(w)) => {
                if !n.contains_placeholder(false) {
                    Some(n)
                } else if !w.contains_placeholder(false) {
                    Some(w)
                } else if !n.is_placeholder() {
                    Some(n)
                } else if !w.is_placeholder() {
                    Some(w)
                } else {
                    Some(n)
                }
            }
            (Some(n), None) => Some(n),
            (None, Some(w)) => Some(w),
            (None, None) => {
                if root != index {
                    Some(self.nodes[root].term.clone())
                } else {
                    None
                }
            }
        })
    }

    fn resolve_directed(
        &self,
        index: usize,
        polarity: Polarity,
        kind: PairKind,
        calculator: &TypeCalculator,
        choicer: &TopologyChoicer<'_>,
        marker: &mut Marker,
    ) -> Result<Option<ExprRef>> {
        let root = self.canonical_index(index);
        if !marker.mark(root) {
            return Err(InferError::CircularVariable {
                path: marker.path_string(),
            });
        }
        let mut resolved = Vec::new();
        for unification in self.edges(root) {
            if unification.polarity != polarity && unification.polarity != Polarity::Both {
                continue;
            }
            match unification.expr.placeholder_index() {
                Some(target) => {
                    let mut fork = marker.fork();
                    match self.resolve_directed(
                        target, polarity, kind, calculator, choicer, &mut fork,
                    )? {
                        Some(inner) => resolved.push(inner),
                        None => resolved.push(self.canonical_term(target)),
                    }
                }
                None => {
                    self.check_occurs(&unification.expr, marker)?;
                    resolved.push(unification.expr.clone());
                }
            }
        }
        Ok(match construct_nested(&resolved, kind) {
            Some(combined) => Some(calculator.compute_with(&combined, choicer)),
            None => None,
        })
    }

    // Occurs check: a compound edge must not contain a placeholder already
    // on the resolution path.
    fn check_occurs(&self, expr: &ExprRef, marker: &Marker) -> Result<()> {
        if let Some(index) = expr.placeholder_index() {
            let root = self.canonical_index(index);
            if marker.contains(root) {
                return Err(InferError::CircularVariable {
                    path: format!("{} ==> '{root}", marker.path_string()),
                });
            }
            return Ok(());
        }
        if let Some((_, left, right)) = expr.as_pair() {
            self.check_occurs(left, marker)?;
            self.check_occurs(right, marker)?;
        }
        Ok(())
    }
}

// Tracks the placeholder indexes visited along one resolution path.
#[derive(Debug, Clone)]
struct Marker {
    seen: HashSet<usize>,
    path: Vec<usize>,
}

impl Marker {
    fn new() -> Self {
        Marker {
            seen: HashSet::new(),
            path: Vec::new(),
        }
    }

    fn mark(&mut self, index: usize) -> bool {
        self.path.push(index);
        self.seen.insert(index)
    }

    fn contains(&self, index: usize) -> bool {
        self.seen.contains(&index)
    }

    fn fork(&self) -> Marker {
        self.clone()
    }

    fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|index| format!("'{index}"))
            .collect::<Vec<_>>()
            .join(" ==> ")
    }
}

/// A choicer that extends the default one with topology knowledge: two
/// expressions relate when one is transitively reachable from the other
/// through the matching polarity edges.
pub(crate) struct TopologyChoicer<'a> {
    topology: &'a Topology,
    calculator: &'a TypeCalculator,
    // Memoized assignability, keyed by the expression handles themselves.
    // Owning the handles keeps the nodes alive, so an entry can never be
    // confused with a later allocation at a recycled address.
    cache: RefCell<Vec<((ExprRef, ExprRef), bool)>>,
}

impl<'a> TopologyChoicer<'a> {
    pub(crate) fn new(topology: &'a Topology, calculator: &'a TypeCalculator) -> Self {
        TopologyChoicer {
            topology,
            calculator,
            cache: RefCell::new(Vec::new()),
        }
    }

    fn traverse(
        &self,
        expr: &ExprRef,
        polarity: Polarity,
        kind: PairKind,
        visited: &mut HashSet<usize>,
        out: &mut Vec<ExprRef>,
    ) {
        match expr.placeholder_index() {
            Some(index) => {
                let root = self.topology.canonical_index(index);
                if !visited.insert(root) {
                    return;
                }
                out.push(self.topology.canonical_term(root));
                for unification in self.topology.edges(root) {
                    if unification.polarity == polarity {
                        self.traverse(&unification.expr, polarity, kind, visited, out);
                    }
                }
            }
            None => match expr.as_pair() {
                Some((k, left, right)) if k == kind => {
                    self.traverse(left, polarity, kind, visited, out);
                    self.traverse(right, polarity, kind, visited, out);
                }
                _ => out.push(expr.clone()),
            },
        }
    }

    // to <: from, witnessed by the topology: either `from` reaches `to`
    // through Out edges, or `to` reaches `from` through In edges.
    fn assignable(&self, to: &ExprRef, from: &ExprRef, kind: PairKind) -> bool {
        if let Some(result) = self.cache.borrow().iter().find_map(|((f, t), result)| {
            (Rc::ptr_eq(f, from) && Rc::ptr_eq(t, to)).then_some(*result)
        }) {
            return result;
        }
        let mut reachable = Vec::new();
        self.traverse(from, Polarity::Out, kind, &mut HashSet::new(), &mut reachable);
        let mut result = reachable
            .iter()
            .any(|expr| self.calculator.equals(expr, to));
        if !result {
            reachable.clear();
            self.traverse(to, Polarity::In, kind, &mut HashSet::new(), &mut reachable);
            result = reachable
                .iter()
                .any(|expr| self.calculator.equals(expr, from));
        }
        self.cache
            .borrow_mut()
            .push(((from.clone(), to.clone()), result));
        result
    }
}

impl Choicer for TopologyChoicer<'_> {
    fn choice_for_and(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
        // Narrowing.
        let rtl = self.assignable(left, right, PairKind::And);
        let ltr = self.assignable(right, left, PairKind::And);
        match (rtl, ltr) {
            (true, true) => Choice::Equal,
            (true, false) => Choice::AcceptRight,
            (false, true) => Choice::AcceptLeft,
            (false, false) => self
                .calculator
                .default_choicer()
                .choice_for_and(root, left, right),
        }
    }

    fn choice_for_or(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
        // Widening.
        let rtl = self.assignable(left, right, PairKind::Or);
        let ltr = self.assignable(right, left, PairKind::Or);
        match (rtl, ltr) {
            (true, true) => Choice::Equal,
            (true, false) => Choice::AcceptLeft,
            (false, true) => Choice::AcceptRight,
            (false, false) => self
                .calculator
                .default_choicer()
                .choice_for_or(root, left, right),
        }
    }
}
