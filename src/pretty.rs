//! Readable rendering of expressions, used by error messages and tests.

use std::fmt;

use crate::expr::{Expr, Literal};

fn is_atom(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Variable { .. }
            | Expr::BoundVariable { .. }
            | Expr::Placeholder { .. }
            | Expr::TypeTerm { .. }
            | Expr::Literal { .. }
            | Expr::Native { .. }
            | Expr::Unspecified
            | Expr::DeadEnd
            | Expr::Fourth
    )
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    if is_atom(expr) {
        write!(f, "{expr}")
    } else {
        write!(f, "({expr})")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Variable { symbol, .. } | Expr::BoundVariable { symbol, .. } => {
                write!(f, "{symbol}")
            }
            Expr::Placeholder { index, .. } => write!(f, "'{index}"),
            Expr::TypeTerm { symbol } => write!(f, "{symbol}"),
            Expr::Literal { value } => match value {
                Literal::Bool(v) => write!(f, "{v}"),
                Literal::Int(v) => write!(f, "{v}"),
                // Debug keeps the decimal point, so 1.0 stays distinct
                // from the integer 1.
                Literal::Double(v) => write!(f, "{v:?}"),
                Literal::Str(v) => write!(f, "\"{v}\""),
            },
            Expr::Native { name, .. } => write!(f, "{name}"),
            Expr::Apply {
                function, argument, ..
            } => {
                write_operand(f, function)?;
                write!(f, " ")?;
                write_operand(f, argument)
            }
            Expr::Lambda {
                parameter, body, ..
            } => {
                write_operand(f, parameter)?;
                write!(f, " -> ")?;
                write_operand(f, body)
            }
            Expr::Function {
                parameter, result, ..
            } => {
                write_operand(f, parameter)?;
                write!(f, " -> ")?;
                write_operand(f, result)
            }
            Expr::And { left, right, .. } => {
                write_operand(f, left)?;
                write!(f, " && ")?;
                write_operand(f, right)
            }
            Expr::Or { left, right, .. } => {
                write_operand(f, left)?;
                write!(f, " || ")?;
                write_operand(f, right)
            }
            Expr::Unspecified => write!(f, "_"),
            Expr::DeadEnd => write!(f, "#DE"),
            Expr::Fourth => write!(f, "#4"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", annotated(self))
    }
}

/// Render `expr:higher_order`, one tower level deep.  Sentinel towers and
/// unspecified annotations are left off.
pub fn annotated(expr: &Expr) -> String {
    let higher_order = expr.higher_order();
    if matches!(
        &*higher_order,
        Expr::Unspecified | Expr::DeadEnd | Expr::Fourth
    ) {
        return format!("{expr}");
    }
    let subject = if is_atom(expr) {
        format!("{expr}")
    } else {
        format!("({expr})")
    };
    if is_atom(&higher_order) {
        format!("{subject}:{higher_order}")
    } else {
        format!("{subject}:({higher_order})")
    }
}
