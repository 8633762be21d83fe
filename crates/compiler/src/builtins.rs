//! Built-in operators and the standard maths library.
//!
//! Operators are ordinary callable symbols named `method <op>`; the parser
//! rewrites `a + b` into `method +(a, b)`, `v.x` into `method x(v)` and so
//! on, and the resolver finds these names in the global symbol table like
//! any other. Each entry is an [`Intrinsic`] descriptor; the code generator
//! dispatches on the argument type tuple (exact match, then scalar↔vector
//! broadcast, then failure) and expands the operation inline.
//!
//! Transcendentals have no backend instruction and are emitted as calls to
//! the `extern "C"` shims below, which the JIT resolves against
//! [`shims`]-registered host symbols.

use crate::symbols::SymbolTable;

/// A polymorphic built-in operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `+ - * /`; `method -` with one argument is negation
    Arith(ArithOp),
    /// `< <= > >= == !=`
    Compare(CompareOp),
    /// Boolean complement
    Not,
    /// `v{k}` subscript with a constant index
    Index,
    /// `v.x`, `v.y`, `v.z`
    Lane(u8),
    /// One-argument maths, applied pointwise to vectors
    Math1(Math1),
    /// Two-argument maths with arithmetic broadcast rules
    Math2(Math2),
    /// Lane sum of a vector
    Sum,
    /// Dot product of two equal-width vectors
    Dot,
    /// Euclidean length of a vector
    Magnitude,
    /// Cross product, `vector*3` only
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Math1 {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
    Log2,
    Log10,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl Math1 {
    /// Host shim to call, or `None` when the backend has a native
    /// instruction for it.
    pub fn shim(&self) -> Option<&'static str> {
        match self {
            Math1::Sin => Some("calculon_sin"),
            Math1::Cos => Some("calculon_cos"),
            Math1::Tan => Some("calculon_tan"),
            Math1::Asin => Some("calculon_asin"),
            Math1::Acos => Some("calculon_acos"),
            Math1::Atan => Some("calculon_atan"),
            Math1::Exp => Some("calculon_exp"),
            Math1::Log => Some("calculon_log"),
            Math1::Log2 => Some("calculon_log2"),
            Math1::Log10 => Some("calculon_log10"),
            Math1::Sqrt | Math1::Abs | Math1::Floor | Math1::Ceil | Math1::Round => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Math2 {
    Pow,
    Atan2,
    Min,
    Max,
}

impl Math2 {
    pub fn shim(&self) -> Option<&'static str> {
        match self {
            Math2::Pow => Some("calculon_pow"),
            Math2::Atan2 => Some("calculon_atan2"),
            Math2::Min | Math2::Max => None,
        }
    }
}

// ----------------------------------------------------------------------
// Host shims. One set per precision; the `f`-suffixed names follow libm.
// ----------------------------------------------------------------------

macro_rules! shim1 {
    ($name:ident, $namef:ident, $method:ident) => {
        extern "C" fn $name(x: f64) -> f64 {
            x.$method()
        }
        extern "C" fn $namef(x: f32) -> f32 {
            x.$method()
        }
    };
}

macro_rules! shim2 {
    ($name:ident, $namef:ident, $method:ident) => {
        extern "C" fn $name(x: f64, y: f64) -> f64 {
            x.$method(y)
        }
        extern "C" fn $namef(x: f32, y: f32) -> f32 {
            x.$method(y)
        }
    };
}

shim1!(calculon_sin, calculon_sinf, sin);
shim1!(calculon_cos, calculon_cosf, cos);
shim1!(calculon_tan, calculon_tanf, tan);
shim1!(calculon_asin, calculon_asinf, asin);
shim1!(calculon_acos, calculon_acosf, acos);
shim1!(calculon_atan, calculon_atanf, atan);
shim1!(calculon_exp, calculon_expf, exp);
shim1!(calculon_log, calculon_logf, ln);
shim1!(calculon_log2, calculon_log2f, log2);
shim1!(calculon_log10, calculon_log10f, log10);
shim2!(calculon_pow, calculon_powf, powf);
shim2!(calculon_atan2, calculon_atan2f, atan2);

/// Every host symbol the JIT module may import, both precisions.
pub(crate) fn shims() -> Vec<(&'static str, *const u8)> {
    vec![
        ("calculon_sin", calculon_sin as *const u8),
        ("calculon_sinf", calculon_sinf as *const u8),
        ("calculon_cos", calculon_cos as *const u8),
        ("calculon_cosf", calculon_cosf as *const u8),
        ("calculon_tan", calculon_tan as *const u8),
        ("calculon_tanf", calculon_tanf as *const u8),
        ("calculon_asin", calculon_asin as *const u8),
        ("calculon_asinf", calculon_asinf as *const u8),
        ("calculon_acos", calculon_acos as *const u8),
        ("calculon_acosf", calculon_acosf as *const u8),
        ("calculon_atan", calculon_atan as *const u8),
        ("calculon_atanf", calculon_atanf as *const u8),
        ("calculon_exp", calculon_exp as *const u8),
        ("calculon_expf", calculon_expf as *const u8),
        ("calculon_log", calculon_log as *const u8),
        ("calculon_logf", calculon_logf as *const u8),
        ("calculon_log2", calculon_log2 as *const u8),
        ("calculon_log2f", calculon_log2f as *const u8),
        ("calculon_log10", calculon_log10 as *const u8),
        ("calculon_log10f", calculon_log10f as *const u8),
        ("calculon_pow", calculon_pow as *const u8),
        ("calculon_powf", calculon_powf as *const u8),
        ("calculon_atan2", calculon_atan2 as *const u8),
        ("calculon_atan2f", calculon_atan2f as *const u8),
    ]
}

// ----------------------------------------------------------------------
// Standard table contents
// ----------------------------------------------------------------------

/// The maths library, registered both as functions (`sin(x)`) and as
/// methods (`x.sin`).
const FUNCTIONS: &[(&str, Intrinsic)] = &[
    ("sin", Intrinsic::Math1(Math1::Sin)),
    ("cos", Intrinsic::Math1(Math1::Cos)),
    ("tan", Intrinsic::Math1(Math1::Tan)),
    ("asin", Intrinsic::Math1(Math1::Asin)),
    ("acos", Intrinsic::Math1(Math1::Acos)),
    ("atan", Intrinsic::Math1(Math1::Atan)),
    ("exp", Intrinsic::Math1(Math1::Exp)),
    ("log", Intrinsic::Math1(Math1::Log)),
    ("log2", Intrinsic::Math1(Math1::Log2)),
    ("log10", Intrinsic::Math1(Math1::Log10)),
    ("sqrt", Intrinsic::Math1(Math1::Sqrt)),
    ("abs", Intrinsic::Math1(Math1::Abs)),
    ("floor", Intrinsic::Math1(Math1::Floor)),
    ("ceil", Intrinsic::Math1(Math1::Ceil)),
    ("round", Intrinsic::Math1(Math1::Round)),
    ("pow", Intrinsic::Math2(Math2::Pow)),
    ("atan2", Intrinsic::Math2(Math2::Atan2)),
    ("min", Intrinsic::Math2(Math2::Min)),
    ("max", Intrinsic::Math2(Math2::Max)),
    ("sum", Intrinsic::Sum),
    ("dot", Intrinsic::Dot),
    ("magnitude", Intrinsic::Magnitude),
    ("cross", Intrinsic::Cross),
];

/// Operators, reachable only through the parser's `method` rewrite.
const OPERATORS: &[(&str, Intrinsic)] = &[
    ("method +", Intrinsic::Arith(ArithOp::Add)),
    ("method -", Intrinsic::Arith(ArithOp::Sub)),
    ("method *", Intrinsic::Arith(ArithOp::Mul)),
    ("method /", Intrinsic::Arith(ArithOp::Div)),
    ("method <", Intrinsic::Compare(CompareOp::Lt)),
    ("method <=", Intrinsic::Compare(CompareOp::Le)),
    ("method >", Intrinsic::Compare(CompareOp::Gt)),
    ("method >=", Intrinsic::Compare(CompareOp::Ge)),
    ("method ==", Intrinsic::Compare(CompareOp::Eq)),
    ("method !=", Intrinsic::Compare(CompareOp::Ne)),
    ("method not", Intrinsic::Not),
    ("method []", Intrinsic::Index),
    ("method x", Intrinsic::Lane(0)),
    ("method y", Intrinsic::Lane(1)),
    ("method z", Intrinsic::Lane(2)),
];

/// Populate `table` with the standard operators and maths library.
pub(crate) fn install_standard(table: &mut SymbolTable) {
    for &(name, op) in OPERATORS {
        table.add_intrinsic(name, op);
    }
    for &(name, op) in FUNCTIONS {
        table.add_intrinsic(name, op);
        table.add_intrinsic(&format!("method {}", name), op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_has_operators_and_methods() {
        let table = SymbolTable::standard();
        for name in ["method +", "method []", "method z", "sin", "method sin", "dot"] {
            assert!(table.entries.contains_key(name), "missing {}", name);
        }
        // pi is a literal handled by the parser, not a table entry.
        assert!(!table.entries.contains_key("pi"));
    }

    #[test]
    fn test_shims_are_unique_and_paired() {
        let shims = shims();
        let mut names: Vec<_> = shims.iter().map(|s| s.0).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), shims.len());
        for math in [Math1::Sin, Math1::Log10] {
            let base = math.shim().unwrap();
            assert!(shims.iter().any(|s| s.0 == base));
            assert!(shims.iter().any(|s| s.0 == format!("{}f", base)));
        }
    }
}
