//! Built-in function catalog
//!
//! Metadata only: name, author, overview, kind and the typed variations of
//! each function, as shown by `LIST FUNCTIONS` and `DESCRIBE FUNCTION`.

use crate::error::{EngineError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

const AUTHOR: &str = "tributary";
const JAR: &str = "internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Scalar => f.write_str("SCALAR"),
            FunctionKind::Aggregate => f.write_str("AGGREGATE"),
        }
    }
}

/// One argument of a variation. Unnamed arguments render as their type only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionArg {
    pub name: &'static str,
    pub arg_type: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionVariant {
    pub args: Vec<FunctionArg>,
    pub returns: &'static str,
    pub description: &'static str,
}

impl FunctionVariant {
    fn signature(&self, function: &str) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a.name.is_empty() {
                    a.arg_type.to_string()
                } else {
                    format!("{} {}", a.name, a.arg_type)
                }
            })
            .collect();
        format!("{}({})", function, args.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub author: &'static str,
    pub overview: &'static str,
    pub kind: FunctionKind,
    pub jar: &'static str,
    pub variants: Vec<FunctionVariant>,
}

/// Renders the `DESCRIBE FUNCTION` text.
impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12}: {}", "Name", self.name)?;
        writeln!(f, "{:<12}: {}", "Author", self.author)?;
        if !self.overview.is_empty() {
            writeln!(f, "{:<12}: {}", "Overview", self.overview)?;
        }
        writeln!(f, "{:<12}: {}", "Type", self.kind.to_string().to_lowercase())?;
        writeln!(f, "{:<12}: {}", "Jar", self.jar)?;
        writeln!(f, "{:<12}: ", "Variations")?;
        for variant in &self.variants {
            writeln!(f)?;
            writeln!(f, "\t{:<12}: {}", "Variation", variant.signature(self.name))?;
            writeln!(f, "\t{:<12}: {}", "Returns", variant.returns)?;
            if !variant.description.is_empty() {
                writeln!(f, "\t{:<12}: {}", "Description", variant.description)?;
            }
            for arg in variant.args.iter().filter(|a| !a.description.is_empty()) {
                writeln!(f, "\t{:<12}: {}", arg.name, arg.description)?;
            }
        }
        Ok(())
    }
}

fn arg(arg_type: &'static str) -> FunctionArg {
    FunctionArg {
        name: "",
        arg_type,
        description: "",
    }
}

fn named(name: &'static str, arg_type: &'static str, description: &'static str) -> FunctionArg {
    FunctionArg {
        name,
        arg_type,
        description,
    }
}

fn variant(args: Vec<FunctionArg>, returns: &'static str, description: &'static str) -> FunctionVariant {
    FunctionVariant {
        args,
        returns,
        description,
    }
}

fn function(
    name: &'static str,
    kind: FunctionKind,
    overview: &'static str,
    variants: Vec<FunctionVariant>,
) -> FunctionDescriptor {
    FunctionDescriptor {
        name,
        author: AUTHOR,
        overview,
        kind,
        jar: JAR,
        variants,
    }
}

/// Registry of functions keyed by upper-case name.
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionDescriptor>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Registry with every built-in function.
    pub fn builtin() -> Self {
        use FunctionKind::{Aggregate, Scalar};

        let mut registry = Self::empty();

        // String functions
        registry.register(function(
            "CONCAT",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR"), arg("VARCHAR")], "VARCHAR", "")],
        ));
        registry.register(function(
            "LCASE",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR")], "VARCHAR", "")],
        ));
        registry.register(function(
            "UCASE",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR")], "VARCHAR", "")],
        ));
        registry.register(function(
            "LEN",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR")], "INT", "")],
        ));
        registry.register(function(
            "TRIM",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR")], "VARCHAR", "")],
        ));
        registry.register(function(
            "SUBSTRING",
            Scalar,
            "Returns a substring of the passed in value.",
            vec![
                variant(
                    vec![
                        named("str", "VARCHAR", "The source string. If null, then function returns null."),
                        named("pos", "INT", "The base-one position the substring starts from."),
                    ],
                    "VARCHAR",
                    "Returns a substring of str that starts at pos and continues to the end of the string",
                ),
                variant(
                    vec![
                        named("str", "VARCHAR", "The source string. If null, then function returns null."),
                        named("pos", "INT", "The base-one position the substring starts from."),
                        named("len", "INT", "The length of the substring to extract."),
                    ],
                    "VARCHAR",
                    "Returns a substring of str that starts at pos and is of length len",
                ),
            ],
        ));
        registry.register(function(
            "EXTRACTJSONFIELD",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR"), arg("VARCHAR")], "VARCHAR", "")],
        ));

        // Time functions
        registry.register(function(
            "TIMESTAMPTOSTRING",
            Scalar,
            "",
            vec![variant(vec![arg("BIGINT"), arg("VARCHAR")], "VARCHAR", "")],
        ));
        registry.register(function(
            "STRINGTOTIMESTAMP",
            Scalar,
            "",
            vec![variant(vec![arg("VARCHAR"), arg("VARCHAR")], "BIGINT", "")],
        ));

        // Math functions
        registry.register(function(
            "ABS",
            Scalar,
            "",
            vec![variant(vec![arg("DOUBLE")], "DOUBLE", "")],
        ));
        registry.register(function(
            "CEIL",
            Scalar,
            "",
            vec![variant(vec![arg("DOUBLE")], "DOUBLE", "")],
        ));
        registry.register(function(
            "FLOOR",
            Scalar,
            "",
            vec![variant(vec![arg("DOUBLE")], "DOUBLE", "")],
        ));
        registry.register(function(
            "ROUND",
            Scalar,
            "",
            vec![variant(vec![arg("DOUBLE")], "BIGINT", "")],
        ));

        // Aggregate functions
        registry.register(function(
            "COUNT",
            Aggregate,
            "",
            vec![variant(vec![arg("BIGINT")], "BIGINT", "Counts the rows of a column, per key.")],
        ));
        registry.register(function(
            "SUM",
            Aggregate,
            "",
            vec![
                variant(vec![arg("INT")], "INT", "Computes the sum for a key."),
                variant(vec![arg("BIGINT")], "BIGINT", "Computes the sum for a key."),
                variant(vec![arg("DOUBLE")], "DOUBLE", "Computes the sum for a key."),
            ],
        ));
        registry.register(function(
            "MAX",
            Aggregate,
            "",
            vec![
                variant(vec![arg("BIGINT")], "BIGINT", "Computes the maximum value for a key."),
                variant(vec![arg("DOUBLE")], "DOUBLE", "Computes the maximum value for a key."),
            ],
        ));
        registry.register(function(
            "MIN",
            Aggregate,
            "",
            vec![
                variant(vec![arg("BIGINT")], "BIGINT", "Computes the minimum value for a key."),
                variant(vec![arg("DOUBLE")], "DOUBLE", "Computes the minimum value for a key."),
            ],
        ));
        registry.register(function(
            "TOPK",
            Aggregate,
            "",
            vec![
                variant(vec![arg("INT")], "ARRAY<INT>", "Calculates the TopK value for a column, per key."),
                variant(vec![arg("BIGINT")], "ARRAY<BIGINT>", "Calculates the TopK value for a column, per key."),
                variant(vec![arg("DOUBLE")], "ARRAY<DOUBLE>", "Calculates the TopK value for a column, per key."),
            ],
        ));
        registry.register(function(
            "TOPKDISTINCT",
            Aggregate,
            "",
            vec![variant(
                vec![arg("BIGINT")],
                "ARRAY<BIGINT>",
                "Calculates the TopK distinct values for a column, per key.",
            )],
        ));

        registry
    }

    /// Add or replace a function.
    pub fn register(&mut self, descriptor: FunctionDescriptor) {
        self.functions
            .insert(descriptor.name.to_uppercase(), descriptor);
    }

    /// Look a function up by name, case-insensitively.
    pub fn describe(&self, name: &str) -> Result<&FunctionDescriptor> {
        self.functions
            .get(&name.trim().to_uppercase())
            .ok_or_else(|| EngineError::FunctionNotFound(name.trim().to_string()))
    }

    /// `(name, kind)` for every function in name order.
    pub fn list(&self) -> Vec<(&'static str, FunctionKind)> {
        self.functions.values().map(|f| (f.name, f.kind)).collect()
    }
}
