//! The expression model.
//!
//! Expressions are "turtles all the way up": every expression carries a
//! higher order that is itself an expression.  The tower is closed by the
//! [`Expr::Fourth`] and [`Expr::DeadEnd`] sentinels, so a term such as
//! `true` has the tower `true : bool : Fourth : DeadEnd`.
//!
//! All nodes are shared behind [`ExprRef`] and immutable; the traversal
//! phases rebuild nodes instead of mutating them.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::error::Result;

/// Shared, immutable expression handle.
pub type ExprRef = Rc<Expr>;

/// Handler of an opaque callable, invoked with the already-reduced argument.
pub type NativeFn = Rc<dyn Fn(ExprRef) -> Result<ExprRef>>;

/// Rank hint threaded through the make-rewritable phase.  Fresh placeholder
/// towers start at the current hint and stop at [`OrderHint::DeadEnd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderHint {
    /// Value level.
    Variable = 0,
    /// Type level.
    Type = 1,
    /// Kind level.
    Kind = 2,
    /// The rank above kinds.
    Fourth = 3,
    /// Top of the tower; no placeholders are created here.
    DeadEnd = 4,
}

impl OrderHint {
    pub(crate) fn succ(self) -> OrderHint {
        match self {
            OrderHint::Variable => OrderHint::Type,
            OrderHint::Type => OrderHint::Kind,
            OrderHint::Kind => OrderHint::Fourth,
            OrderHint::Fourth | OrderHint::DeadEnd => OrderHint::DeadEnd,
        }
    }

    /// Number of tower levels between this hint and the dead end, capped at
    /// the number of ranks below [`OrderHint::DeadEnd`].
    pub(crate) fn tower_height(self) -> usize {
        (OrderHint::DeadEnd as usize - self as usize).min(OrderHint::Fourth as usize)
    }
}

/// A constant value carried by [`Expr::Literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Boolean constant.
    Bool(bool),
    /// Integer constant.
    Int(i64),
    /// Floating point constant.
    Double(f64),
    /// String constant.
    Str(String),
}

impl Literal {
    /// The nominal type this literal inhabits.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Double(_) => "double",
            Literal::Str(_) => "string",
        }
    }
}

/// Kind discriminant for the pair-shaped expression variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairKind {
    Apply,
    Lambda,
    Function,
    And,
    Or,
}

/// A typed lambda-calculus expression.
///
/// The sum is closed on purpose: every traversal phase dispatches with an
/// exhaustive `match`, so adding a variant is a compile-time checklist of
/// all the places that must learn about it.
pub enum Expr {
    /// A free variable reference.  `candidates` is populated during the
    /// infer phase with the overload set found in scope.
    Variable {
        /// The referenced symbol.
        symbol: String,
        /// Declared or inferred higher order.
        higher_order: ExprRef,
        /// Overload candidates, present after inference.
        candidates: Option<Vec<ExprRef>>,
    },
    /// A lambda parameter binding site.
    BoundVariable {
        /// The bound symbol.
        symbol: String,
        /// Declared or inferred higher order.
        higher_order: ExprRef,
    },
    /// An inference variable, identified by a dense arena index.
    Placeholder {
        /// Arena index; also the identity of the placeholder.
        index: usize,
        /// The next tower level (another placeholder or a sentinel).
        higher_order: ExprRef,
    },
    /// A nominal type leaf such as `bool`; its higher order is `Fourth`.
    TypeTerm {
        /// The type name.
        symbol: String,
    },
    /// A constant; its higher order is the `TypeTerm` naming its type.
    Literal {
        /// The constant value.
        value: Literal,
    },
    /// Application `function argument`.
    Apply {
        /// The applied expression.
        function: ExprRef,
        /// The argument expression.
        argument: ExprRef,
        /// Higher order of the application result.
        higher_order: ExprRef,
    },
    /// Abstraction `parameter -> body` at the value level.
    Lambda {
        /// The parameter, normally a `BoundVariable`.
        parameter: ExprRef,
        /// The body expression.
        body: ExprRef,
        /// Higher order, normally a `Function` arrow.
        higher_order: ExprRef,
    },
    /// The function *type* arrow `parameter -> result`.
    Function {
        /// Parameter type.
        parameter: ExprRef,
        /// Result type.
        result: ExprRef,
        /// Higher order (the arrow one tower level up).
        higher_order: ExprRef,
    },
    /// Algebraic narrowing combination `left && right`.
    And {
        /// Left operand.
        left: ExprRef,
        /// Right operand.
        right: ExprRef,
        /// Higher order of the combination.
        higher_order: ExprRef,
    },
    /// Algebraic widening combination `left || right`.
    Or {
        /// Left operand.
        left: ExprRef,
        /// Right operand.
        right: ExprRef,
        /// Higher order of the combination.
        higher_order: ExprRef,
    },
    /// An opaque callable implemented in Rust, reduced call-by-value.
    Native {
        /// Display name; also the identity of the callable.
        name: String,
        /// Declared higher order (normally a `Function` arrow).
        higher_order: ExprRef,
        /// The handler.
        call: NativeFn,
    },
    /// "No type given"; replaced by a fresh placeholder tower during the
    /// make-rewritable phase and ignored by unification.
    Unspecified,
    /// Top-of-tower sentinel; ignored by unification.
    DeadEnd,
    /// The rank-3 sentinel above kinds; its higher order is `DeadEnd`.
    Fourth,
}

/// Cross-kind identity of a term: identity terms with equal identities are
/// interchangeable regardless of the node kind carrying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Identity<'a> {
    Symbol(&'a str),
    Index(usize),
}

impl Expr {
    pub(crate) fn identity(&self) -> Option<Identity<'_>> {
        match self {
            Expr::Variable { symbol, .. }
            | Expr::BoundVariable { symbol, .. }
            | Expr::TypeTerm { symbol } => Some(Identity::Symbol(symbol)),
            Expr::Placeholder { index, .. } => Some(Identity::Index(*index)),
            _ => None,
        }
    }

    pub(crate) fn as_pair(&self) -> Option<(PairKind, &ExprRef, &ExprRef)> {
        match self {
            Expr::Apply {
                function, argument, ..
            } => Some((PairKind::Apply, function, argument)),
            Expr::Lambda {
                parameter, body, ..
            } => Some((PairKind::Lambda, parameter, body)),
            Expr::Function {
                parameter, result, ..
            } => Some((PairKind::Function, parameter, result)),
            Expr::And { left, right, .. } => Some((PairKind::And, left, right)),
            Expr::Or { left, right, .. } => Some((PairKind::Or, left, right)),
            _ => None,
        }
    }

    /// Rebuild a pair of the given kind with an unspecified higher order,
    /// letting the factories re-derive the tower where applicable.
    pub(crate) fn make_pair(kind: PairKind, left: ExprRef, right: ExprRef) -> ExprRef {
        match kind {
            PairKind::Apply => Expr::apply(left, right),
            PairKind::Lambda => Expr::lambda(left, right),
            PairKind::Function => Expr::function_of(left, right),
            PairKind::And => Expr::and(left, right),
            PairKind::Or => Expr::or(left, right),
        }
    }

    /// The next level of the tower.  Computed for leaves without a stored
    /// higher order; the sentinels close the tower with `DeadEnd`.
    pub fn higher_order(&self) -> ExprRef {
        match self {
            Expr::Variable { higher_order, .. }
            | Expr::BoundVariable { higher_order, .. }
            | Expr::Placeholder { higher_order, .. }
            | Expr::Apply { higher_order, .. }
            | Expr::Lambda { higher_order, .. }
            | Expr::Function { higher_order, .. }
            | Expr::And { higher_order, .. }
            | Expr::Or { higher_order, .. }
            | Expr::Native { higher_order, .. } => higher_order.clone(),
            Expr::TypeTerm { .. } => Expr::fourth(),
            Expr::Literal { value } => Expr::type_term(value.type_name()),
            Expr::Unspecified | Expr::DeadEnd | Expr::Fourth => Expr::dead_end(),
        }
    }

    /// Unification skips these terms entirely.
    pub(crate) fn is_ignored_by_unifier(&self) -> bool {
        matches!(self, Expr::Unspecified | Expr::DeadEnd)
    }

    pub(crate) fn is_placeholder(&self) -> bool {
        matches!(self, Expr::Placeholder { .. })
    }

    pub(crate) fn placeholder_index(&self) -> Option<usize> {
        match self {
            Expr::Placeholder { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Whether any placeholder occurs in the term; `with_higher_order`
    /// additionally descends into the towers.
    pub(crate) fn contains_placeholder(&self, with_higher_order: bool) -> bool {
        match self {
            Expr::Placeholder { .. } => true,
            Expr::Unspecified | Expr::DeadEnd | Expr::Fourth => false,
            _ => {
                if let Some((_, left, right)) = self.as_pair() {
                    if left.contains_placeholder(with_higher_order)
                        || right.contains_placeholder(with_higher_order)
                    {
                        return true;
                    }
                }
                with_higher_order && self.higher_order().contains_placeholder(true)
            }
        }
    }
}

// Constructors.  Higher orders default to `Unspecified` where the infer
// phase is expected to fill them in; the lambda/function factories derive
// the tower eagerly instead.
impl Expr {
    /// An unspecified term.
    pub fn unspecified() -> ExprRef {
        Rc::new(Expr::Unspecified)
    }

    /// The dead-end sentinel.
    pub fn dead_end() -> ExprRef {
        Rc::new(Expr::DeadEnd)
    }

    /// The fourth-rank sentinel.
    pub fn fourth() -> ExprRef {
        Rc::new(Expr::Fourth)
    }

    /// A free variable with an unspecified higher order.
    pub fn variable(symbol: &str) -> ExprRef {
        Expr::variable_with(symbol, Expr::unspecified())
    }

    /// A free variable with an explicit higher order (a type annotation).
    pub fn variable_with(symbol: &str, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::Variable {
            symbol: symbol.to_string(),
            higher_order,
            candidates: None,
        })
    }

    pub(crate) fn variable_candidates(
        symbol: String,
        higher_order: ExprRef,
        candidates: Vec<ExprRef>,
    ) -> ExprRef {
        Rc::new(Expr::Variable {
            symbol,
            higher_order,
            candidates: Some(candidates),
        })
    }

    /// A binding site for a lambda parameter.
    pub fn bound_variable(symbol: &str, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::BoundVariable {
            symbol: symbol.to_string(),
            higher_order,
        })
    }

    pub(crate) fn placeholder(index: usize, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::Placeholder {
            index,
            higher_order,
        })
    }

    /// A nominal type leaf.
    pub fn type_term(symbol: &str) -> ExprRef {
        Rc::new(Expr::TypeTerm {
            symbol: symbol.to_string(),
        })
    }

    /// A boolean constant.
    pub fn bool_literal(value: bool) -> ExprRef {
        Rc::new(Expr::Literal {
            value: Literal::Bool(value),
        })
    }

    /// An integer constant.
    pub fn int_literal(value: i64) -> ExprRef {
        Rc::new(Expr::Literal {
            value: Literal::Int(value),
        })
    }

    /// A floating point constant.
    pub fn double_literal(value: f64) -> ExprRef {
        Rc::new(Expr::Literal {
            value: Literal::Double(value),
        })
    }

    /// A string constant.
    pub fn string_literal(value: &str) -> ExprRef {
        Rc::new(Expr::Literal {
            value: Literal::Str(value.to_string()),
        })
    }

    /// Application with an unspecified result type.
    pub fn apply(function: ExprRef, argument: ExprRef) -> ExprRef {
        Expr::apply_with(function, argument, Expr::unspecified())
    }

    pub(crate) fn apply_with(
        function: ExprRef,
        argument: ExprRef,
        higher_order: ExprRef,
    ) -> ExprRef {
        Rc::new(Expr::Apply {
            function,
            argument,
            higher_order,
        })
    }

    /// Narrowing combination with an unspecified higher order.
    pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
        Rc::new(Expr::And {
            left,
            right,
            higher_order: Expr::unspecified(),
        })
    }

    /// Widening combination with an unspecified higher order.
    pub fn or(left: ExprRef, right: ExprRef) -> ExprRef {
        Rc::new(Expr::Or {
            left,
            right,
            higher_order: Expr::unspecified(),
        })
    }

    pub(crate) fn and_with(left: ExprRef, right: ExprRef, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::And {
            left,
            right,
            higher_order,
        })
    }

    pub(crate) fn or_with(left: ExprRef, right: ExprRef, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::Or {
            left,
            right,
            higher_order,
        })
    }

    /// Abstraction.  The higher-order arrow is derived from the children;
    /// a `DeadEnd` child collapses the whole node.
    pub fn lambda(parameter: ExprRef, body: ExprRef) -> ExprRef {
        match (&*parameter, &*body) {
            (Expr::DeadEnd, _) | (_, Expr::DeadEnd) => Expr::dead_end(),
            _ => {
                let higher_order = Expr::arrow_higher_order(&parameter, &body);
                Rc::new(Expr::Lambda {
                    parameter,
                    body,
                    higher_order,
                })
            }
        }
    }

    pub(crate) fn lambda_with(parameter: ExprRef, body: ExprRef, higher_order: ExprRef) -> ExprRef {
        Rc::new(Expr::Lambda {
            parameter,
            body,
            higher_order,
        })
    }

    /// The function type arrow.  Builds its own tower recursively and
    /// short-circuits at the sentinels.
    pub fn function_of(parameter: ExprRef, result: ExprRef) -> ExprRef {
        match (&*parameter, &*result) {
            (Expr::DeadEnd, _) | (_, Expr::DeadEnd) => Expr::dead_end(),
            (Expr::Fourth, Expr::Fourth) => Rc::new(Expr::Function {
                parameter,
                result,
                higher_order: Expr::dead_end(),
            }),
            _ => {
                let higher_order = Expr::arrow_higher_order(&parameter, &result);
                Rc::new(Expr::Function {
                    parameter,
                    result,
                    higher_order,
                })
            }
        }
    }

    pub(crate) fn function_with(
        parameter: ExprRef,
        result: ExprRef,
        higher_order: ExprRef,
    ) -> ExprRef {
        Rc::new(Expr::Function {
            parameter,
            result,
            higher_order,
        })
    }

    /// An opaque callable.
    pub fn native<F>(name: &str, higher_order: ExprRef, call: F) -> ExprRef
    where
        F: Fn(ExprRef) -> Result<ExprRef> + 'static,
    {
        Rc::new(Expr::Native {
            name: name.to_string(),
            higher_order,
            call: Rc::new(call),
        })
    }

    // The higher order of an arrow node: both children unspecified closes
    // the tower, a single unspecified child keeps an unspecified slot so a
    // placeholder can be minted for it later.
    fn arrow_higher_order(parameter: &ExprRef, body: &ExprRef) -> ExprRef {
        match (&**parameter, &**body) {
            (Expr::Unspecified, Expr::Unspecified) => Expr::dead_end(),
            (Expr::Unspecified, _) => {
                Expr::function_of(Expr::unspecified(), body.higher_order())
            }
            (_, Expr::Unspecified) => {
                Expr::function_of(parameter.higher_order(), Expr::unspecified())
            }
            _ => Expr::function_of(parameter.higher_order(), body.higher_order()),
        }
    }
}

impl PartialEq for Expr {
    /// Structural equality.  Identity terms compare by identity across node
    /// kinds; higher orders are deliberately excluded (that comparison is
    /// `TypeCalculator::exact_equals`).
    fn eq(&self, other: &Expr) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => return a == b,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }
        match (self, other) {
            (Expr::Literal { value: a }, Expr::Literal { value: b }) => a == b,
            (Expr::Native { name: a, .. }, Expr::Native { name: b, .. }) => a == b,
            (Expr::Unspecified, Expr::Unspecified)
            | (Expr::DeadEnd, Expr::DeadEnd)
            | (Expr::Fourth, Expr::Fourth) => true,
            _ => match (self.as_pair(), other.as_pair()) {
                (Some((ka, la, ra)), Some((kb, lb, rb))) => ka == kb && la == lb && ra == rb,
                _ => false,
            },
        }
    }
}

fn rank(expr: &Expr) -> u8 {
    match expr {
        Expr::DeadEnd => 0,
        Expr::Fourth => 1,
        Expr::Unspecified => 2,
        Expr::Placeholder { .. } => 3,
        Expr::TypeTerm { .. } => 4,
        Expr::Literal { .. } => 5,
        Expr::Variable { .. } => 6,
        Expr::BoundVariable { .. } => 7,
        Expr::Native { .. } => 8,
        Expr::Function { .. } => 9,
        Expr::Lambda { .. } => 10,
        Expr::Apply { .. } => 11,
        Expr::And { .. } => 12,
        Expr::Or { .. } => 13,
    }
}

/// Deterministic total order used for canonical operand ordering, so that
/// flattened And/Or comparisons are insensitive to operand order.
pub(crate) fn expr_cmp(a: &Expr, b: &Expr) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Expr::Placeholder { index: i, .. }, Expr::Placeholder { index: j, .. }) => i.cmp(j),
        (Expr::TypeTerm { symbol: x }, Expr::TypeTerm { symbol: y })
        | (Expr::Variable { symbol: x, .. }, Expr::Variable { symbol: y, .. })
        | (Expr::BoundVariable { symbol: x, .. }, Expr::BoundVariable { symbol: y, .. })
        | (Expr::Native { name: x, .. }, Expr::Native { name: y, .. }) => x.cmp(y),
        (Expr::Literal { value: _ }, Expr::Literal { value: _ }) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => match (a.as_pair(), b.as_pair()) {
            (Some((_, la, ra)), Some((_, lb, rb))) => {
                expr_cmp(la, lb).then_with(|| expr_cmp(ra, rb))
            }
            _ => Ordering::Equal,
        },
    })
}
