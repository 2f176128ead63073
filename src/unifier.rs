//! Pairwise unification of two expressions against the topology.
//!
//! Unification walks both towers and cores, expanding And/Or operands,
//! treating function parameters contravariantly, and recording placeholder
//! edges.  Inserting an edge cross-checks it against the node's existing
//! edges; edges that turn out to be unsatisfiable are dropped.

use log::trace;

use crate::calculator::TypeCalculator;
use crate::error::{InferError, Result};
use crate::expr::{Expr, ExprRef};
use crate::pretty::annotated;
use crate::topology::{Polarity, Topology, Unification};

pub(crate) struct Unifier<'a> {
    pub(crate) topology: &'a mut Topology,
    pub(crate) calculator: &'a TypeCalculator,
}

impl Unifier<'_> {
    pub(crate) fn unify(
        &mut self,
        from: &ExprRef,
        to: &ExprRef,
        bidirectional: bool,
    ) -> Result<()> {
        trace!(
            "unify {} {} {}",
            from,
            if bidirectional { "<=>" } else { "==>" },
            to
        );
        let _ = self.internal_unify(from, to, bidirectional, true)?;
        Ok(())
    }

    fn internal_unify(
        &mut self,
        from: &ExprRef,
        to: &ExprRef,
        bidirectional: bool,
        raise: bool,
    ) -> Result<bool> {
        if self.calculator.exact_equals(from, to) {
            return Ok(true);
        }
        if from.is_ignored_by_unifier() || to.is_ignored_by_unifier() {
            return Ok(true);
        }
        // Towers first; the cores only unify when their towers do.
        if !self.internal_unify(&from.higher_order(), &to.higher_order(), bidirectional, raise)? {
            return Ok(false);
        }
        self.internal_unify_core(from, to, bidirectional, raise)
    }

    fn internal_unify_core(
        &mut self,
        from: &ExprRef,
        to: &ExprRef,
        bidirectional: bool,
        raise: bool,
    ) -> Result<bool> {
        match (&**from, &**to) {
            // Each operand of a combination unifies against the other side.
            (Expr::And { left, right, .. } | Expr::Or { left, right, .. }, _) => {
                let a = self.internal_unify(left, to, false, raise)?;
                let b = self.internal_unify(right, to, false, raise)?;
                Ok(a && b)
            }
            (_, Expr::And { left, right, .. } | Expr::Or { left, right, .. }) => {
                let a = self.internal_unify(from, left, false, raise)?;
                let b = self.internal_unify(from, right, false, raise)?;
                Ok(a && b)
            }

            // Parameters are contravariant, results covariant.
            (
                Expr::Function {
                    parameter: fp,
                    result: fr,
                    ..
                },
                Expr::Function {
                    parameter: tp,
                    result: tr,
                    ..
                },
            ) => {
                // A failed parameter stops the arrow: unifying the results
                // anyway would leak bounds from a rejected overload.
                if !self.internal_unify(tp, fp, false, raise)? {
                    return Ok(false);
                }
                self.internal_unify(fr, tr, false, raise)
            }

            (_, Expr::Placeholder { index, .. }) if !bidirectional => {
                let index = *index;
                self.add_forward(index, from)
            }
            (Expr::Placeholder { index, .. }, _) if !bidirectional => {
                let index = *index;
                self.add_backward(index, to)
            }
            (_, Expr::Placeholder { index, .. }) => {
                let index = *index;
                self.add_both(index, from)
            }
            (Expr::Placeholder { index, .. }, _) => {
                let index = *index;
                self.add_both(index, to)
            }

            // Two concrete expressions: accept iff `from` widens into `to`.
            _ => {
                let widened = self
                    .calculator
                    .compute(&Expr::or(from.clone(), to.clone()));
                if self.calculator.equals(&widened, to) {
                    Ok(true)
                } else if raise {
                    Err(InferError::CouldNotUnify {
                        from: annotated(from),
                        to: annotated(to),
                    })
                } else {
                    Ok(false)
                }
            }
        }
    }

    // ph <== expr: the expression is a lower bound of the placeholder.  A
    // placeholder expression also receives the mirrored Out edge.
    fn add_forward(&mut self, index: usize, expr: &ExprRef) -> Result<bool> {
        self.internal_add(index, expr, Polarity::In)?;
        if let Some(other) = expr.placeholder_index() {
            let term = self.topology.canonical_term(index);
            self.internal_add(other, &term, Polarity::Out)?;
        }
        Ok(true)
    }

    // ph ==> expr: the expression is an upper bound of the placeholder.
    fn add_backward(&mut self, index: usize, expr: &ExprRef) -> Result<bool> {
        self.internal_add(index, expr, Polarity::Out)?;
        if let Some(other) = expr.placeholder_index() {
            let term = self.topology.canonical_term(index);
            self.internal_add(other, &term, Polarity::In)?;
        }
        Ok(true)
    }

    // ph <=> expr.  Two distinct placeholders become an alias instead of a
    // pair of equality edges.
    fn add_both(&mut self, index: usize, expr: &ExprRef) -> Result<bool> {
        match expr.placeholder_index() {
            Some(other) => self.topology.alias(index, other),
            None => self.internal_add(index, expr, Polarity::Both)?,
        }
        Ok(true)
    }

    // Insert an edge, cross-checking it against the node's existing edges.
    // Crossing polarities unify recursively in the prescribed direction;
    // matching polarities append only new information; edges that fail the
    // cross-check are removed.
    fn internal_add(&mut self, index: usize, expr: &ExprRef, polarity: Polarity) -> Result<()> {
        let root = self.topology.find_compress(index);
        let expr = self.topology.replace_alias(expr);
        let existing = self.topology.edges_snapshot(root);
        if existing.is_empty() {
            self.topology.append_edge(root, Unification { expr, polarity });
            return Ok(());
        }

        let mut succeeded = false;
        let mut append = false;
        let mut remove = Vec::new();
        for unification in existing {
            let (ok, append_new) = match (unification.polarity, polarity) {
                (Polarity::Both, Polarity::In) => (
                    self.internal_unify(&expr, &unification.expr, false, false)?,
                    false,
                ),
                (Polarity::Both, Polarity::Out) => (
                    self.internal_unify(&unification.expr, &expr, false, false)?,
                    false,
                ),
                (Polarity::In, Polarity::Both) => (
                    self.internal_unify(&unification.expr, &expr, false, false)?,
                    false,
                ),
                (Polarity::Out, Polarity::Both) => (
                    self.internal_unify(&expr, &unification.expr, false, false)?,
                    false,
                ),
                (Polarity::Out, Polarity::In) => (
                    self.internal_unify(&expr, &unification.expr, false, false)?,
                    false,
                ),
                (Polarity::In, Polarity::Out) => (
                    self.internal_unify(&unification.expr, &expr, false, false)?,
                    false,
                ),
                (Polarity::In, Polarity::In) | (Polarity::Out, Polarity::Out) => {
                    (true, !self.calculator.equals(&unification.expr, &expr))
                }
                (Polarity::Both, Polarity::Both) => (
                    self.internal_unify(&unification.expr, &expr, true, false)?,
                    false,
                ),
            };
            if ok {
                succeeded = true;
                if append_new {
                    append = true;
                }
            } else {
                remove.push(unification);
            }
        }

        for unification in &remove {
            self.topology.remove_edge(root, unification);
        }
        if !succeeded || append {
            self.topology.append_edge(root, Unification { expr, polarity });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(name: &str) -> ExprRef {
        Expr::type_term(name)
    }

    fn topology_with(placeholders: usize) -> Topology {
        let mut topology = Topology::new();
        for index in 0..placeholders {
            topology.register(&Expr::placeholder(index, Expr::dead_end()));
        }
        topology
    }

    #[test]
    fn concrete_equal_types_unify() {
        let calc = TypeCalculator::new();
        let mut topology = Topology::new();
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        assert!(unifier.unify(&ty("bool"), &ty("bool"), false).is_ok());
    }

    #[test]
    fn concrete_unrelated_types_do_not_unify() {
        let calc = TypeCalculator::new();
        let mut topology = Topology::new();
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        let err = unifier.unify(&ty("bool"), &ty("int"), false).unwrap_err();
        assert!(matches!(err, InferError::CouldNotUnify { .. }));
    }

    #[test]
    fn directional_unification_records_an_in_edge() {
        let calc = TypeCalculator::new();
        let mut topology = topology_with(1);
        let ph = Expr::placeholder(0, Expr::dead_end());
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        unifier.unify(&ty("bool"), &ph, false).unwrap();
        let edges = topology.edges(0);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].polarity, Polarity::In);
        assert!(calc.equals(&edges[0].expr, &ty("bool")));
    }

    #[test]
    fn bidirectional_placeholders_become_an_alias() {
        let calc = TypeCalculator::new();
        let mut topology = topology_with(2);
        let ph0 = Expr::placeholder(0, Expr::dead_end());
        let ph1 = Expr::placeholder(1, Expr::dead_end());
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        unifier.unify(&ph1, &ph0, true).unwrap();
        assert_eq!(topology.canonical_index(1), 0);
    }

    #[test]
    fn directional_placeholders_mirror_edges() {
        let calc = TypeCalculator::new();
        let mut topology = topology_with(2);
        let ph0 = Expr::placeholder(0, Expr::dead_end());
        let ph1 = Expr::placeholder(1, Expr::dead_end());
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        // '0 flows into '1.
        unifier.unify(&ph0, &ph1, false).unwrap();
        assert_eq!(topology.edges(1)[0].polarity, Polarity::In);
        assert_eq!(topology.edges(0)[0].polarity, Polarity::Out);
    }

    #[test]
    fn function_parameters_unify_contravariantly() {
        let calc = TypeCalculator::new();
        let mut topology = topology_with(2);
        let ph0 = Expr::placeholder(0, Expr::dead_end());
        let ph1 = Expr::placeholder(1, Expr::dead_end());
        let declared = Expr::function_of(ty("bool"), ph1);
        let applied = Expr::function_of(ph0, ty("int"));
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        unifier.unify(&declared, &applied, false).unwrap();
        // Both placeholders receive upper bounds: the parameter placeholder
        // widens into bool, the result placeholder into int.
        assert!(topology
            .edges(0)
            .iter()
            .any(|u| u.polarity == Polarity::Out && calc.equals(&u.expr, &ty("bool"))));
        assert!(topology
            .edges(1)
            .iter()
            .any(|u| u.polarity == Polarity::Out && calc.equals(&u.expr, &ty("int"))));
    }

    #[test]
    fn unspecified_terms_are_ignored() {
        let calc = TypeCalculator::new();
        let mut topology = Topology::new();
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        assert!(unifier.unify(&Expr::unspecified(), &ty("int"), false).is_ok());
        assert!(unifier.unify(&ty("int"), &Expr::dead_end(), false).is_ok());
    }

    #[test]
    fn or_operands_each_unify_against_the_target() {
        let calc = TypeCalculator::new();
        let mut topology = topology_with(1);
        let ph = Expr::placeholder(0, Expr::dead_end());
        let combined = Expr::or(ty("bool"), ty("int"));
        let mut unifier = Unifier {
            topology: &mut topology,
            calculator: &calc,
        };
        unifier.unify(&combined, &ph, false).unwrap();
        let edges = topology.edges(0);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|u| u.polarity == Polarity::In));
    }
}
