//! The algebraic And/Or calculator.
//!
//! And/Or nodes describe narrowing and widening combinations over a subtype
//! lattice.  [`TypeCalculator::compute`] normalizes such combinations by
//! absorption (`A && (A || B) == A`) and pairwise shrinking, driven by a
//! pluggable [`Choicer`] that decides how two operands relate.  The default
//! choicer knows structural equality and function variance; the unification
//! topology supplies a stronger one during resolution.

use std::fmt;
use std::rc::Rc;

use crate::expr::{expr_cmp, Expr, ExprRef, PairKind};

/// Outcome of relating two operands under And/Or.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// No relation; both operands stay.
    NonRelated,
    /// The operands are interchangeable.
    Equal,
    /// The left operand subsumes the combination.
    AcceptLeft,
    /// The right operand subsumes the combination.
    AcceptRight,
}

/// Decides how two operands of an And/Or combination relate.
///
/// `root` is the outermost choicer; implementations recurse through it so
/// that wrappers (like the topology-aware choicer) see nested pairs.
pub trait Choicer {
    /// Relation under a narrowing (And) combination.
    fn choice_for_and(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice;

    /// Relation under a widening (Or) combination.
    fn choice_for_or(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice;
}

// Merge the independent choices made for the parameter and result sides of
// a function pair.  Disagreement means the functions are unrelated.
fn merge_variance(parameter: Choice, result: Choice) -> Choice {
    match (parameter, result) {
        (Choice::Equal, Choice::Equal) => Choice::Equal,
        (Choice::Equal | Choice::AcceptLeft, Choice::Equal | Choice::AcceptLeft) => {
            Choice::AcceptLeft
        }
        (Choice::Equal | Choice::AcceptRight, Choice::Equal | Choice::AcceptRight) => {
            Choice::AcceptRight
        }
        _ => Choice::NonRelated,
    }
}

/// The default choicer: structural (flattened) equality plus function
/// variance.  Function parameters combine contravariantly, results
/// covariantly.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeChoicer;

impl Choicer for TypeChoicer {
    fn choice_for_and(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
        if equivalent(left, right) {
            return Choice::Equal;
        }
        if let (
            Expr::Function {
                parameter: lp,
                result: lr,
                ..
            },
            Expr::Function {
                parameter: rp,
                result: rr,
                ..
            },
        ) = (&**left, &**right)
        {
            let parameter = root.choice_for_or(root, lp, rp);
            let result = root.choice_for_and(root, lr, rr);
            return merge_variance(parameter, result);
        }
        Choice::NonRelated
    }

    fn choice_for_or(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
        if equivalent(left, right) {
            return Choice::Equal;
        }
        if let (
            Expr::Function {
                parameter: lp,
                result: lr,
                ..
            },
            Expr::Function {
                parameter: rp,
                result: rr,
                ..
            },
        ) = (&**left, &**right)
        {
            let parameter = root.choice_for_and(root, lp, rp);
            let result = root.choice_for_or(root, lr, rr);
            return merge_variance(parameter, result);
        }
        Choice::NonRelated
    }
}

/// Collect the operands of same-kind nested combinations, one logical level
/// deep (opposite-kind children stay intact).
pub(crate) fn flatten(kind: PairKind, expr: &ExprRef, out: &mut Vec<ExprRef>) {
    match expr.as_pair() {
        Some((k, left, right)) if k == kind => {
            flatten(kind, left, out);
            flatten(kind, right, out);
        }
        _ => out.push(expr.clone()),
    }
}

// Fully flattened, canonically sorted form, used for order-insensitive
// comparison.
#[derive(PartialEq)]
enum Flattened {
    Leaf(ExprRef),
    Combined(PairKind, Vec<Flattened>),
}

fn flattened_cmp(a: &Flattened, b: &Flattened) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Flattened::Leaf(x), Flattened::Leaf(y)) => expr_cmp(x, y),
        (Flattened::Leaf(_), Flattened::Combined(..)) => Ordering::Less,
        (Flattened::Combined(..), Flattened::Leaf(_)) => Ordering::Greater,
        (Flattened::Combined(ka, xs), Flattened::Combined(kb, ys)) => (*ka as u8)
            .cmp(&(*kb as u8))
            .then_with(|| xs.len().cmp(&ys.len()))
            .then_with(|| {
                xs.iter()
                    .zip(ys)
                    .map(|(x, y)| flattened_cmp(x, y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
    }
}

fn flatten_all(expr: &ExprRef) -> Flattened {
    match &**expr {
        Expr::And { .. } | Expr::Or { .. } => {
            let (kind, _, _) = match expr.as_pair() {
                Some(pair) => pair,
                None => return Flattened::Leaf(expr.clone()),
            };
            let mut operands = Vec::new();
            flatten(kind, expr, &mut operands);
            let mut items: Vec<Flattened> = operands.iter().map(flatten_all).collect();
            items.sort_by(flattened_cmp);
            items.dedup();
            Flattened::Combined(kind, items)
        }
        _ => Flattened::Leaf(expr.clone()),
    }
}

/// Order-insensitive equality of And/Or combinations: both sides are
/// recursively flattened, canonically sorted and deduplicated before
/// comparison.
pub(crate) fn equivalent(left: &ExprRef, right: &ExprRef) -> bool {
    flatten_all(left) == flatten_all(right)
}

/// Rebuild a nested combination from a list of operands by right fold.
/// Returns `None` for an empty list.
pub(crate) fn construct_nested(items: &[ExprRef], kind: PairKind) -> Option<ExprRef> {
    let mut iter = items.iter().rev();
    let last = iter.next()?.clone();
    Some(iter.fold(last, |acc, item| Expr::make_pair(kind, item.clone(), acc)))
}

/// Sort expressions by the canonical order of a derived key, keeping the
/// relative order of ties.
pub(crate) fn sort_expressions<F>(key: F, mut items: Vec<ExprRef>) -> Vec<ExprRef>
where
    F: Fn(&ExprRef) -> ExprRef,
{
    items.sort_by(|a, b| expr_cmp(&key(a), &key(b)));
    items
}

/// Computes algebraic combinations over the subtype lattice.
pub struct TypeCalculator {
    default_choicer: Rc<dyn Choicer>,
}

impl fmt::Debug for TypeCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TypeCalculator")
    }
}

impl Default for TypeCalculator {
    fn default() -> Self {
        TypeCalculator::new()
    }
}

impl TypeCalculator {
    /// Calculator with the [`TypeChoicer`] default choicer.
    pub fn new() -> Self {
        TypeCalculator {
            default_choicer: Rc::new(TypeChoicer),
        }
    }

    /// Calculator with a custom default choicer, e.g. one aware of a
    /// nominal subtype lattice.
    pub fn with_choicer(choicer: Rc<dyn Choicer>) -> Self {
        TypeCalculator {
            default_choicer: choicer,
        }
    }

    /// The choicer used when no stronger one is supplied.
    pub fn default_choicer(&self) -> &dyn Choicer {
        &*self.default_choicer
    }

    /// Normalize an expression with the default choicer.
    pub fn compute(&self, expr: &ExprRef) -> ExprRef {
        self.compute_with(expr, &*self.default_choicer)
    }

    /// Normalize an expression: children first, then absorption, then
    /// pairwise shrinking, then right-fold reconstruction.  Non-combination
    /// expressions and unchanged combinations are returned as-is.
    pub fn compute_with(&self, expr: &ExprRef, choicer: &dyn Choicer) -> ExprRef {
        let kind = match &**expr {
            Expr::And { .. } => PairKind::And,
            Expr::Or { .. } => PairKind::Or,
            _ => return expr.clone(),
        };
        let (_, left, right) = match expr.as_pair() {
            Some(pair) => pair,
            None => return expr.clone(),
        };
        let left_computed = self.compute_with(left, choicer);
        let right_computed = self.compute_with(right, choicer);

        let absorbed = self.absorb(choicer, kind, &left_computed, &right_computed);
        if !absorbed.is_empty() {
            let opposite = match kind {
                PairKind::And => PairKind::Or,
                _ => PairKind::And,
            };
            if let Some(rebuilt) = construct_nested(&absorbed, opposite) {
                return self.compute_with(&rebuilt, choicer);
            }
        }

        let mut operands = Vec::new();
        flatten(kind, &left_computed, &mut operands);
        flatten(kind, &right_computed, &mut operands);
        let before = operands.clone();
        self.shrink(choicer, kind, &mut operands);

        if operands.len() == 1 {
            return operands.remove(0);
        }
        if operands == before
            && Rc::ptr_eq(&left_computed, left)
            && Rc::ptr_eq(&right_computed, right)
        {
            return expr.clone();
        }
        match construct_nested(&operands, kind) {
            Some(rebuilt) => rebuilt,
            None => expr.clone(),
        }
    }

    /// Order-insensitive equality of flattened forms.
    pub fn equals(&self, left: &ExprRef, right: &ExprRef) -> bool {
        equivalent(left, right)
    }

    /// [`TypeCalculator::equals`] extended up the towers: the computed
    /// higher orders must be recursively equal as well.  A tower closed by
    /// a sentinel on either side terminates the comparison.
    pub fn exact_equals(&self, left: &ExprRef, right: &ExprRef) -> bool {
        if !equivalent(left, right) {
            return false;
        }
        let lho = left.higher_order();
        let rho = right.higher_order();
        if matches!(&*lho, Expr::Unspecified | Expr::DeadEnd)
            || matches!(&*rho, Expr::Unspecified | Expr::DeadEnd)
        {
            return true;
        }
        self.exact_equals(&self.compute(&lho), &self.compute(&rho))
    }

    // A && (A || B) == A, and dually for Or.  One side must be an
    // opposite-kind combination; each of its operands related to the other
    // side contributes the chosen expression, and the survivors recombine
    // under the opposite kind.
    fn absorb(
        &self,
        choicer: &dyn Choicer,
        kind: PairKind,
        left: &ExprRef,
        right: &ExprRef,
    ) -> Vec<ExprRef> {
        let opposite = match kind {
            PairKind::And => PairKind::Or,
            _ => PairKind::And,
        };
        let choose = |l: &ExprRef, r: &ExprRef| match kind {
            PairKind::And => choicer.choice_for_and(choicer, l, r),
            _ => choicer.choice_for_or(choicer, l, r),
        };

        let mut out = Vec::new();
        if matches!(right.as_pair(), Some((k, _, _)) if k == opposite) {
            let mut operands = Vec::new();
            flatten(opposite, right, &mut operands);
            for op in &operands {
                match choose(left, op) {
                    Choice::Equal | Choice::AcceptLeft => out.push(left.clone()),
                    Choice::AcceptRight => out.push(op.clone()),
                    Choice::NonRelated => {}
                }
            }
        } else if matches!(left.as_pair(), Some((k, _, _)) if k == opposite) {
            let mut operands = Vec::new();
            flatten(opposite, left, &mut operands);
            for op in &operands {
                match choose(op, right) {
                    Choice::Equal | Choice::AcceptLeft => out.push(op.clone()),
                    Choice::AcceptRight => out.push(right.clone()),
                    Choice::NonRelated => {}
                }
            }
        }
        out
    }

    // Pairwise fixpoint collapse of a flattened operand list.
    fn shrink(&self, choicer: &dyn Choicer, kind: PairKind, operands: &mut Vec<ExprRef>) {
        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            while i < operands.len() {
                let mut j = i + 1;
                while j < operands.len() {
                    if equivalent(&operands[i], &operands[j]) {
                        let _ = operands.remove(j);
                        changed = true;
                        continue;
                    }
                    let choice = match kind {
                        PairKind::And => {
                            choicer.choice_for_and(choicer, &operands[i], &operands[j])
                        }
                        _ => choicer.choice_for_or(choicer, &operands[i], &operands[j]),
                    };
                    match choice {
                        Choice::Equal | Choice::AcceptLeft => {
                            let _ = operands.remove(j);
                            changed = true;
                        }
                        Choice::AcceptRight => {
                            operands[i] = operands[j].clone();
                            let _ = operands.remove(j);
                            changed = true;
                        }
                        Choice::NonRelated => j += 1,
                    }
                }
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ty(name: &str) -> ExprRef {
        Expr::type_term(name)
    }

    // int <= num, everything else unrelated.
    struct NumericChoicer;

    impl NumericChoicer {
        fn narrower(&self, left: &ExprRef, right: &ExprRef) -> Option<bool> {
            match (&**left, &**right) {
                (Expr::TypeTerm { symbol: a }, Expr::TypeTerm { symbol: b })
                    if a == "int" && b == "num" =>
                {
                    Some(true)
                }
                (Expr::TypeTerm { symbol: a }, Expr::TypeTerm { symbol: b })
                    if a == "num" && b == "int" =>
                {
                    Some(false)
                }
                _ => None,
            }
        }
    }

    impl Choicer for NumericChoicer {
        fn choice_for_and(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
            match self.narrower(left, right) {
                Some(true) => Choice::AcceptLeft,
                Some(false) => Choice::AcceptRight,
                None => TypeChoicer.choice_for_and(root, left, right),
            }
        }

        fn choice_for_or(&self, root: &dyn Choicer, left: &ExprRef, right: &ExprRef) -> Choice {
            match self.narrower(left, right) {
                Some(true) => Choice::AcceptRight,
                Some(false) => Choice::AcceptLeft,
                None => TypeChoicer.choice_for_or(root, left, right),
            }
        }
    }

    #[test]
    fn and_is_idempotent() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(ty("bool"), ty("bool"));
        assert_eq!(calc.compute(&expr), ty("bool"));
    }

    #[test]
    fn or_is_idempotent() {
        let calc = TypeCalculator::new();
        let expr = Expr::or(ty("bool"), ty("bool"));
        assert_eq!(calc.compute(&expr), ty("bool"));
    }

    #[test]
    fn idempotence_through_nesting() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(ty("a"), Expr::and(ty("b"), ty("a")));
        assert_eq!(calc.compute(&expr), Expr::and(ty("a"), ty("b")));
    }

    #[test]
    fn equals_is_commutative() {
        let calc = TypeCalculator::new();
        let ab = Expr::or(ty("a"), ty("b"));
        let ba = Expr::or(ty("b"), ty("a"));
        assert!(calc.equals(&ab, &ba));
    }

    #[test]
    fn equals_ignores_nesting_shape() {
        let calc = TypeCalculator::new();
        let l = Expr::and(Expr::and(ty("a"), ty("b")), ty("c"));
        let r = Expr::and(ty("c"), Expr::and(ty("b"), ty("a")));
        assert!(calc.equals(&l, &r));
        assert!(!calc.equals(&l, &Expr::or(ty("a"), ty("b"))));
    }

    #[test]
    fn absorption_and_over_or() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(ty("a"), Expr::or(ty("a"), ty("b")));
        assert_eq!(calc.compute(&expr), ty("a"));
    }

    #[test]
    fn absorption_or_over_and() {
        let calc = TypeCalculator::new();
        let expr = Expr::or(ty("a"), Expr::and(ty("a"), ty("b")));
        assert_eq!(calc.compute(&expr), ty("a"));
    }

    #[test]
    fn absorption_on_the_left() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(Expr::or(ty("b"), ty("a")), ty("a"));
        assert_eq!(calc.compute(&expr), ty("a"));
    }

    #[test]
    fn unrelated_types_stay_combined() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(ty("a"), ty("b"));
        let computed = calc.compute(&expr);
        assert!(calc.equals(&computed, &expr));
        let expr = Expr::or(ty("a"), ty("b"));
        let computed = calc.compute(&expr);
        assert!(calc.equals(&computed, &expr));
    }

    #[test]
    fn unchanged_combination_keeps_identity() {
        let calc = TypeCalculator::new();
        let expr = Expr::and(ty("a"), ty("b"));
        let computed = calc.compute(&expr);
        assert!(Rc::ptr_eq(&expr, &computed));
    }

    // Computing a computed result is a no-op, down to the handle.
    #[test]
    fn compute_is_idempotent_over_its_result() {
        let calc = TypeCalculator::new();
        let absorbed = calc.compute(&Expr::and(ty("a"), Expr::or(ty("a"), ty("b"))));
        assert_eq!(absorbed, ty("a"));
        assert!(Rc::ptr_eq(&absorbed, &calc.compute(&absorbed)));
        let deduplicated = calc.compute(&Expr::or(ty("a"), Expr::or(ty("b"), ty("a"))));
        let again = calc.compute(&deduplicated);
        assert!(calc.equals(&deduplicated, &again));
        assert!(Rc::ptr_eq(&deduplicated, &again));
    }

    #[test]
    fn lattice_narrowing_picks_the_subtype() {
        let calc = TypeCalculator::with_choicer(Rc::new(NumericChoicer));
        let expr = Expr::and(ty("num"), ty("int"));
        assert_eq!(calc.compute(&expr), ty("int"));
    }

    #[test]
    fn lattice_widening_picks_the_supertype() {
        let calc = TypeCalculator::with_choicer(Rc::new(NumericChoicer));
        let expr = Expr::or(ty("num"), ty("int"));
        assert_eq!(calc.compute(&expr), ty("num"));
    }

    #[test]
    fn function_parameters_combine_contravariantly() {
        let calc = TypeCalculator::with_choicer(Rc::new(NumericChoicer));
        // (num -> int) is narrower than (int -> num).
        let narrow = Expr::function_of(ty("num"), ty("int"));
        let wide = Expr::function_of(ty("int"), ty("num"));
        let and = calc.compute(&Expr::and(narrow.clone(), wide.clone()));
        assert!(calc.equals(&and, &narrow));
        let or = calc.compute(&Expr::or(narrow, wide.clone()));
        assert!(calc.equals(&or, &wide));
    }

    #[test]
    fn mismatched_function_variance_stays_combined() {
        let calc = TypeCalculator::with_choicer(Rc::new(NumericChoicer));
        let f = Expr::function_of(ty("int"), ty("int"));
        let g = Expr::function_of(ty("num"), ty("num"));
        let and = calc.compute(&Expr::and(f.clone(), g.clone()));
        assert!(calc.equals(&and, &Expr::and(f, g)));
    }

    #[test]
    fn exact_equals_compares_towers() {
        let calc = TypeCalculator::new();
        let a = Expr::variable_with("a", ty("bool"));
        let b = Expr::variable_with("a", ty("int"));
        assert!(calc.equals(&a, &b));
        assert!(!calc.exact_equals(&a, &b));
        let c = Expr::variable_with("a", ty("bool"));
        assert!(calc.exact_equals(&a, &c));
    }
}
