//! The binding environment and the public inference entry points.

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::calculator::TypeCalculator;
use crate::context::Session;
use crate::error::{InferError, Result};
use crate::expr::{ExprRef, OrderHint};

/// One overload of a bound symbol.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    /// The bound symbol.
    pub symbol: String,
    /// The higher order the symbol was declared with.
    pub symbol_higher_order: ExprRef,
    /// The bound expression.
    pub expression: ExprRef,
}

/// Lookup of overload sets by symbol.  An inner scope with a hit for the
/// symbol completely shadows the outer ones.
pub(crate) trait VariableScope {
    fn lookup(&self, symbol: &str) -> Vec<VariableInfo>;
}

/// The root scope: a registry of bound symbols plus the calculator used by
/// every phase.
#[derive(Debug)]
pub struct Environment {
    registry: HashMap<String, Vec<VariableInfo>>,
    calculator: Rc<TypeCalculator>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl VariableScope for Environment {
    fn lookup(&self, symbol: &str) -> Vec<VariableInfo> {
        self.registry.get(symbol).cloned().unwrap_or_default()
    }
}

impl Environment {
    /// An empty environment with the default calculator.
    pub fn new() -> Self {
        Environment::with_calculator(Rc::new(TypeCalculator::new()))
    }

    /// An empty environment with a custom calculator, e.g. one whose
    /// choicer knows a nominal subtype lattice.
    pub fn with_calculator(calculator: Rc<TypeCalculator>) -> Self {
        Environment {
            registry: HashMap::new(),
            calculator,
        }
    }

    /// The calculator shared by every inference session.
    pub fn calculator(&self) -> &TypeCalculator {
        &self.calculator
    }

    /// Bind a symbol to an expression, declaring the symbol with the
    /// expression's own higher order.  Binding the same symbol repeatedly
    /// builds an overload set.
    pub fn bind(&mut self, symbol: &str, expression: ExprRef) -> Result<()> {
        let higher_order = expression.higher_order();
        self.bind_with(symbol, higher_order, expression)
    }

    /// Bind a symbol with an explicit symbol higher order.  Rebinding the
    /// same (symbol, expression) pair is rejected.
    pub fn bind_with(
        &mut self,
        symbol: &str,
        symbol_higher_order: ExprRef,
        expression: ExprRef,
    ) -> Result<()> {
        let entries = self.registry.entry(symbol.to_string()).or_default();
        if entries.iter().any(|info| *info.expression == *expression) {
            return Err(InferError::DuplicateBinding {
                symbol: symbol.to_string(),
            });
        }
        entries.push(VariableInfo {
            symbol: symbol.to_string(),
            symbol_higher_order,
            expression,
        });
        Ok(())
    }

    /// Infer the types of an expression: make-rewritable, infer, topology
    /// normalization, fixup.
    pub fn infer(&self, expr: &ExprRef) -> Result<ExprRef> {
        let mut session = Session::new(self.calculator());
        let fixed = self.run_inference(&mut session, expr)?;
        Ok(fixed)
    }

    /// Infer and then reduce an expression to its normal form.
    pub fn reduce(&self, expr: &ExprRef) -> Result<ExprRef> {
        let mut session = Session::new(self.calculator());
        let fixed = self.run_inference(&mut session, expr)?;
        let reduced = session.reduce(self, &fixed)?;
        debug!("reduced: {reduced}");
        Ok(reduced)
    }

    fn run_inference(&self, session: &mut Session<'_>, expr: &ExprRef) -> Result<ExprRef> {
        let rewritable = session.make_rewritable(expr, OrderHint::Variable);
        debug!("rewritable: {rewritable}");
        let inferred = session.infer(self, &rewritable)?;
        debug!("inferred: {inferred}");
        session.normalize_topology();
        let fixed = session.fixup(&inferred)?;
        debug!("fixed up: {fixed}");
        Ok(fixed)
    }
}
