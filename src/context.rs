//! The four-phase traversal: make-rewritable, infer, fixup, reduce.
//!
//! A [`Session`] owns the unification topology and the placeholder counter
//! for one inference run.  The first two phases mutate the topology; fixup
//! and reduce only read it, so placeholder resolution can consult the
//! topology-aware choicer freely.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::calculator::{construct_nested, sort_expressions, TypeCalculator};
use crate::environment::{VariableInfo, VariableScope};
use crate::error::Result;
use crate::expr::{Expr, ExprRef, OrderHint, PairKind};
use crate::topology::Topology;
use crate::unifier::Unifier;

/// One scope level created by binding a lambda parameter.  A hit here
/// completely shadows the outer scopes; overload sets never merge across
/// levels.
pub(crate) struct BoundFrame<'p> {
    symbol: String,
    info: VariableInfo,
    parent: &'p dyn VariableScope,
}

impl VariableScope for BoundFrame<'_> {
    fn lookup(&self, symbol: &str) -> Vec<VariableInfo> {
        if self.symbol == symbol {
            vec![self.info.clone()]
        } else {
            self.parent.lookup(symbol)
        }
    }
}

impl<'p> BoundFrame<'p> {
    fn bind(parent: &'p dyn VariableScope, symbol: &str, info: VariableInfo) -> Self {
        BoundFrame {
            symbol: symbol.to_string(),
            info,
            parent,
        }
    }
}

/// State of one inference run.
pub(crate) struct Session<'c> {
    calculator: &'c TypeCalculator,
    topology: Topology,
    next_placeholder: AtomicUsize,
}

impl<'c> Session<'c> {
    pub(crate) fn new(calculator: &'c TypeCalculator) -> Self {
        Session {
            calculator,
            topology: Topology::new(),
            next_placeholder: AtomicUsize::new(0),
        }
    }

    pub(crate) fn normalize_topology(&mut self) {
        self.topology.normalize();
    }

    /// Mint a fresh placeholder tower starting at the given rank: one
    /// placeholder per remaining level, chained through their higher orders
    /// and closed by `DeadEnd`.  Returns the lowest placeholder.
    pub(crate) fn create_placeholder(&mut self, hint: OrderHint) -> ExprRef {
        let count = hint.tower_height();
        if count == 0 {
            return Expr::dead_end();
        }
        let start = self.next_placeholder.fetch_add(count, Ordering::SeqCst);
        let mut tower = Vec::with_capacity(count);
        let mut higher_order = Expr::dead_end();
        for offset in (0..count).rev() {
            let placeholder = Expr::placeholder(start + offset, higher_order.clone());
            tower.push(placeholder.clone());
            higher_order = placeholder;
        }
        for placeholder in tower.iter().rev() {
            self.topology.register(placeholder);
        }
        higher_order
    }

    fn unifier(&mut self) -> Unifier<'_> {
        Unifier {
            topology: &mut self.topology,
            calculator: self.calculator,
        }
    }

    /// Phase 1: replace every `Unspecified` with a fresh placeholder tower.
    /// Higher orders descend with an incremented rank hint and the whole
    /// traversal short-circuits at the tower top.
    pub(crate) fn make_rewritable(&mut self, expr: &ExprRef, hint: OrderHint) -> ExprRef {
        if hint >= OrderHint::DeadEnd {
            return Expr::dead_end();
        }
        match &**expr {
            Expr::Unspecified => self.create_placeholder(hint),
            Expr::Variable {
                symbol,
                higher_order,
                candidates,
            } => {
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Rc::new(Expr::Variable {
                    symbol: symbol.clone(),
                    higher_order,
                    candidates: candidates.clone(),
                })
            }
            Expr::BoundVariable {
                symbol,
                higher_order,
            } => {
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::bound_variable(symbol, higher_order)
            }
            Expr::Apply {
                function,
                argument,
                higher_order,
            } => {
                let function = self.make_rewritable(function, hint);
                let argument = self.make_rewritable(argument, hint);
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::apply_with(function, argument, higher_order)
            }
            Expr::Lambda {
                parameter,
                body,
                higher_order,
            } => {
                let parameter = self.make_rewritable(parameter, hint);
                let body = self.make_rewritable(body, hint);
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::lambda_with(parameter, body, higher_order)
            }
            Expr::Function {
                parameter,
                result,
                higher_order,
            } => {
                let parameter = self.make_rewritable(parameter, hint);
                let result = self.make_rewritable(result, hint);
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::function_with(parameter, result, higher_order)
            }
            Expr::And {
                left,
                right,
                higher_order,
            } => {
                let left = self.make_rewritable(left, hint);
                let right = self.make_rewritable(right, hint);
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::and_with(left, right, higher_order)
            }
            Expr::Or {
                left,
                right,
                higher_order,
            } => {
                let left = self.make_rewritable(left, hint);
                let right = self.make_rewritable(right, hint);
                let higher_order = self.make_rewritable(higher_order, hint.succ());
                Expr::or_with(left, right, higher_order)
            }
            Expr::Placeholder { .. }
            | Expr::TypeTerm { .. }
            | Expr::Literal { .. }
            | Expr::Native { .. }
            | Expr::DeadEnd
            | Expr::Fourth => expr.clone(),
        }
    }

    /// Phase 2: bottom-up unification.
    pub(crate) fn infer(&mut self, scope: &dyn VariableScope, expr: &ExprRef) -> Result<ExprRef> {
        match &**expr {
            Expr::Apply {
                function,
                argument,
                higher_order,
            } => {
                let function = self.infer(scope, function)?;
                let argument = self.infer(scope, argument)?;
                let higher_order = self.infer(scope, higher_order)?;
                let signature = Expr::function_of(argument.higher_order(), higher_order.clone());
                self.unifier()
                    .unify(&function.higher_order(), &signature, false)?;
                Ok(Expr::apply_with(function, argument, higher_order))
            }
            Expr::Lambda {
                parameter,
                body,
                higher_order,
            } => {
                let parameter = self.infer(scope, parameter)?;
                let body = if let Expr::BoundVariable { symbol, .. } = &*parameter {
                    let frame = BoundFrame::bind(
                        scope,
                        symbol,
                        VariableInfo {
                            symbol: symbol.clone(),
                            symbol_higher_order: parameter.higher_order(),
                            expression: parameter.clone(),
                        },
                    );
                    self.infer(&frame, body)?
                } else {
                    self.infer(scope, body)?
                };
                let higher_order = self.infer(scope, higher_order)?;
                if !matches!(&*higher_order, Expr::DeadEnd | Expr::Fourth) {
                    let signature =
                        Expr::function_of(parameter.higher_order(), body.higher_order());
                    if !matches!(&*signature, Expr::DeadEnd) {
                        self.unifier().unify(&signature, &higher_order, true)?;
                    }
                }
                Ok(Expr::lambda_with(parameter, body, higher_order))
            }
            Expr::Function {
                parameter,
                result,
                higher_order,
            } => {
                let parameter = self.infer(scope, parameter)?;
                let result = self.infer(scope, result)?;
                let higher_order = self.infer(scope, higher_order)?;
                if !matches!(&*higher_order, Expr::DeadEnd | Expr::Fourth) {
                    let signature =
                        Expr::function_of(parameter.higher_order(), result.higher_order());
                    if !matches!(&*signature, Expr::DeadEnd) {
                        self.unifier().unify(&signature, &higher_order, true)?;
                    }
                }
                Ok(Expr::function_with(parameter, result, higher_order))
            }
            Expr::And {
                left,
                right,
                higher_order,
            }
            | Expr::Or {
                left,
                right,
                higher_order,
            } => {
                let is_and = matches!(&**expr, Expr::And { .. });
                let left = self.infer(scope, left)?;
                let right = self.infer(scope, right)?;
                let higher_order = self.infer(scope, higher_order)?;
                self.unifier()
                    .unify(&left.higher_order(), &right.higher_order(), true)?;
                self.unifier()
                    .unify(&left.higher_order(), &higher_order, false)?;
                self.unifier()
                    .unify(&right.higher_order(), &higher_order, false)?;
                Ok(if is_and {
                    Expr::and_with(left, right, higher_order)
                } else {
                    Expr::or_with(left, right, higher_order)
                })
            }
            Expr::Variable {
                symbol,
                higher_order,
                candidates,
            } => {
                if candidates.is_some() {
                    return Ok(expr.clone());
                }
                let higher_order = self.infer(scope, higher_order)?;
                let entries = scope.lookup(symbol);
                if entries.is_empty() {
                    return Ok(Expr::variable_with(symbol, higher_order));
                }
                let mut targets = Vec::new();
                for info in &entries {
                    // A symbol bound to itself must not recurse.
                    if self.calculator.exact_equals(expr, &info.expression) {
                        continue;
                    }
                    let symbol_ho = {
                        let rewritten =
                            self.make_rewritable(&info.symbol_higher_order, OrderHint::Type);
                        self.infer(scope, &rewritten)?
                    };
                    let target = {
                        let rewritten =
                            self.make_rewritable(&info.expression, OrderHint::Variable);
                        self.infer(scope, &rewritten)?
                    };
                    targets.push((symbol_ho, target));
                }
                if !targets.is_empty() {
                    let symbol_hos: Vec<ExprRef> =
                        targets.iter().map(|(sho, _)| sho.clone()).collect();
                    let target_hos: Vec<ExprRef> =
                        targets.iter().map(|(_, t)| t.higher_order()).collect();
                    if let (Some(symbol_ho), Some(target_ho)) = (
                        construct_nested(&symbol_hos, PairKind::Or),
                        construct_nested(&target_hos, PairKind::Or),
                    ) {
                        self.unifier().unify(&symbol_ho, &target_ho, true)?;
                        self.unifier().unify(&target_ho, &higher_order, true)?;
                    }
                }
                let candidates = sort_expressions(
                    |e| e.higher_order(),
                    targets.into_iter().map(|(_, t)| t).collect(),
                );
                Ok(Expr::variable_candidates(
                    symbol.clone(),
                    higher_order,
                    candidates,
                ))
            }
            Expr::BoundVariable {
                symbol,
                higher_order,
            } => {
                let higher_order = self.infer(scope, higher_order)?;
                Ok(Expr::bound_variable(symbol, higher_order))
            }
            Expr::Placeholder { .. }
            | Expr::TypeTerm { .. }
            | Expr::Literal { .. }
            | Expr::Native { .. }
            | Expr::Unspecified
            | Expr::DeadEnd
            | Expr::Fourth => Ok(expr.clone()),
        }
    }

    /// Phase 3: resolve placeholders against the topology and filter
    /// overload candidates by the resolved higher orders.
    pub(crate) fn fixup(&self, expr: &ExprRef) -> Result<ExprRef> {
        match &**expr {
            Expr::Placeholder {
                index,
                higher_order,
            } => match self.topology.resolve(*index, self.calculator)? {
                // A resolved bare placeholder is final: re-resolving it
                // would only bounce along the mirrored edge it came from.
                Some(resolved) if !self.calculator.equals(&resolved, expr) => match &*resolved {
                    Expr::Placeholder {
                        index: resolved_index,
                        higher_order: resolved_ho,
                    } => {
                        let higher_order = self.fixup_higher_order(resolved_ho)?;
                        Ok(Expr::placeholder(*resolved_index, higher_order))
                    }
                    _ => self.fixup(&resolved),
                },
                _ => {
                    let higher_order = self.fixup_higher_order(higher_order)?;
                    Ok(Expr::placeholder(*index, higher_order))
                }
            },
            Expr::Variable {
                symbol,
                higher_order,
                candidates,
            } => {
                let higher_order = self.fixup_higher_order(higher_order)?;
                if let Some(existing) = candidates {
                    if !existing.is_empty() {
                        let targets: Vec<ExprRef> = existing
                            .iter()
                            .map(|candidate| self.fixup(candidate))
                            .collect::<Result<_>>()?;
                        let target_hos: Vec<ExprRef> =
                            targets.iter().map(|t| t.higher_order()).collect();
                        if let Some(targets_ho) = construct_nested(&target_hos, PairKind::Or) {
                            let filter = self
                                .calculator
                                .compute(&Expr::and(higher_order.clone(), targets_ho));
                            let filtered: Vec<ExprRef> = targets
                                .iter()
                                .filter(|target| {
                                    let narrowed = self.calculator.compute(&Expr::and(
                                        target.higher_order(),
                                        filter.clone(),
                                    ));
                                    self.calculator.equals(&narrowed, &filter)
                                })
                                .cloned()
                                .collect();
                            let filtered = sort_expressions(|e| e.higher_order(), filtered);
                            if !filtered.is_empty() {
                                return Ok(Expr::variable_candidates(
                                    symbol.clone(),
                                    higher_order,
                                    filtered,
                                ));
                            }
                        }
                    }
                }
                Ok(Rc::new(Expr::Variable {
                    symbol: symbol.clone(),
                    higher_order,
                    candidates: candidates.clone(),
                }))
            }
            Expr::BoundVariable {
                symbol,
                higher_order,
            } => {
                let higher_order = self.fixup_higher_order(higher_order)?;
                Ok(Expr::bound_variable(symbol, higher_order))
            }
            Expr::Apply {
                function,
                argument,
                higher_order,
            } => {
                let function = self.fixup(function)?;
                let argument = self.fixup(argument)?;
                let higher_order = self.fixup_higher_order(higher_order)?;
                Ok(Expr::apply_with(function, argument, higher_order))
            }
            Expr::Lambda {
                parameter,
                body,
                higher_order,
            } => {
                let parameter = self.fixup(parameter)?;
                let body = self.fixup(body)?;
                let higher_order = self.fixup_higher_order(higher_order)?;
                // A resolved arrow is kept; anything else re-derives the
                // tower through the factory.
                match &*higher_order {
                    Expr::Function { .. } => Ok(Expr::lambda_with(parameter, body, higher_order)),
                    _ => Ok(Expr::lambda(parameter, body)),
                }
            }
            Expr::Function {
                parameter,
                result,
                higher_order,
            } => {
                let parameter = self.fixup(parameter)?;
                let result = self.fixup(result)?;
                let higher_order = self.fixup_higher_order(higher_order)?;
                match &*higher_order {
                    Expr::Function { .. } => {
                        Ok(Expr::function_with(parameter, result, higher_order))
                    }
                    _ => Ok(Expr::function_of(parameter, result)),
                }
            }
            Expr::And {
                left,
                right,
                higher_order,
            } => {
                let left = self.fixup(left)?;
                let right = self.fixup(right)?;
                let higher_order = self.fixup_higher_order(higher_order)?;
                Ok(Expr::and_with(left, right, higher_order))
            }
            Expr::Or {
                left,
                right,
                higher_order,
            } => {
                let left = self.fixup(left)?;
                let right = self.fixup(right)?;
                let higher_order = self.fixup_higher_order(higher_order)?;
                Ok(Expr::or_with(left, right, higher_order))
            }
            Expr::TypeTerm { .. }
            | Expr::Literal { .. }
            | Expr::Native { .. }
            | Expr::Unspecified
            | Expr::DeadEnd
            | Expr::Fourth => Ok(expr.clone()),
        }
    }

    // Fixed-up higher orders are normalized right away so annotations read
    // as computed types.
    fn fixup_higher_order(&self, higher_order: &ExprRef) -> Result<ExprRef> {
        let fixed = self.fixup(higher_order)?;
        Ok(self.calculator.compute(&fixed))
    }

    /// Phase 4: left-outermost reduction.  Lambdas are applied call-by-name
    /// through the scope chain; opaque callables call-by-value.
    pub(crate) fn reduce(&self, scope: &dyn VariableScope, expr: &ExprRef) -> Result<ExprRef> {
        match &**expr {
            Expr::Apply {
                function, argument, ..
            } => {
                let mut current = function.clone();
                loop {
                    let callee = current.clone();
                    match &*callee {
                        Expr::Lambda {
                            parameter, body, ..
                        } => {
                            if let Expr::BoundVariable { symbol, .. } = &**parameter {
                                let frame = BoundFrame::bind(
                                    scope,
                                    symbol,
                                    VariableInfo {
                                        symbol: symbol.clone(),
                                        symbol_higher_order: parameter.higher_order(),
                                        expression: argument.clone(),
                                    },
                                );
                                return self.reduce(&frame, body);
                            }
                            return self.reduce(scope, body);
                        }
                        Expr::Native { call, .. } => {
                            let argument = self.reduce(scope, argument)?;
                            let produced = (**call)(argument)?;
                            return self.reduce(scope, &produced);
                        }
                        _ => {
                            let reduced = self.reduce(scope, &callee)?;
                            // Non-callable fixpoint: reconstruct the
                            // application, keeping the original node when
                            // nothing stepped so outer loops terminate.
                            if Rc::ptr_eq(&reduced, &callee) {
                                let reduced_argument = self.reduce(scope, argument)?;
                                if Rc::ptr_eq(&reduced, function)
                                    && Rc::ptr_eq(&reduced_argument, argument)
                                {
                                    return Ok(expr.clone());
                                }
                                return Ok(Expr::apply_with(
                                    reduced,
                                    reduced_argument,
                                    expr.higher_order(),
                                ));
                            }
                            current = reduced;
                        }
                    }
                }
            }
            Expr::Variable {
                symbol,
                higher_order,
                candidates,
            } => {
                if let Some(first) = candidates.as_ref().and_then(|c| c.first()) {
                    if let Expr::BoundVariable {
                        symbol: bound_symbol,
                        higher_order: bound_ho,
                    } = &**first
                    {
                        let entries = scope.lookup(bound_symbol);
                        let matched: Vec<ExprRef> = entries
                            .iter()
                            .filter(|info| {
                                self.calculator.equals(&info.symbol_higher_order, bound_ho)
                            })
                            .map(|info| info.expression.clone())
                            .collect();
                        let matched = sort_expressions(|e| e.higher_order(), matched);
                        if matched.len() == 1 {
                            return self.reduce(scope, &matched[0]);
                        }
                        if matched.len() >= 2 {
                            return Ok(Expr::variable_candidates(
                                symbol.clone(),
                                higher_order.clone(),
                                matched,
                            ));
                        }
                    } else if candidates.as_ref().map_or(false, |c| c.len() == 1) {
                        return self.reduce(scope, first);
                    }
                }
                Ok(expr.clone())
            }
            Expr::Lambda {
                parameter,
                body,
                higher_order,
            } => {
                let reduced_parameter = self.reduce(scope, parameter)?;
                let reduced_body = self.reduce(scope, body)?;
                if Rc::ptr_eq(&reduced_parameter, parameter) && Rc::ptr_eq(&reduced_body, body) {
                    Ok(expr.clone())
                } else {
                    Ok(Expr::lambda_with(
                        reduced_parameter,
                        reduced_body,
                        higher_order.clone(),
                    ))
                }
            }
            Expr::Function {
                parameter,
                result,
                higher_order,
            } => {
                let reduced_parameter = self.reduce(scope, parameter)?;
                let reduced_result = self.reduce(scope, result)?;
                if Rc::ptr_eq(&reduced_parameter, parameter)
                    && Rc::ptr_eq(&reduced_result, result)
                {
                    Ok(expr.clone())
                } else {
                    Ok(Expr::function_with(
                        reduced_parameter,
                        reduced_result,
                        higher_order.clone(),
                    ))
                }
            }
            Expr::And {
                left,
                right,
                higher_order,
            } => {
                let reduced_left = self.reduce(scope, left)?;
                let reduced_right = self.reduce(scope, right)?;
                let combined = if Rc::ptr_eq(&reduced_left, left) && Rc::ptr_eq(&reduced_right, right)
                {
                    expr.clone()
                } else {
                    Expr::and_with(reduced_left, reduced_right, higher_order.clone())
                };
                Ok(self.calculator.compute(&combined))
            }
            Expr::Or {
                left,
                right,
                higher_order,
            } => {
                let reduced_left = self.reduce(scope, left)?;
                let reduced_right = self.reduce(scope, right)?;
                let combined = if Rc::ptr_eq(&reduced_left, left) && Rc::ptr_eq(&reduced_right, right)
                {
                    expr.clone()
                } else {
                    Expr::or_with(reduced_left, reduced_right, higher_order.clone())
                };
                Ok(self.calculator.compute(&combined))
            }
            Expr::BoundVariable { .. }
            | Expr::Placeholder { .. }
            | Expr::TypeTerm { .. }
            | Expr::Literal { .. }
            | Expr::Native { .. }
            | Expr::Unspecified
            | Expr::DeadEnd
            | Expr::Fourth => Ok(expr.clone()),
        }
    }
}
