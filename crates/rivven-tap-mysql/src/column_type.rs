//! Native MySQL column type construction
//!
//! Turns raw type text such as `decimal(25,4) unsigned` or `varchar(97)` into
//! a concrete [`ColumnType`] backed by a registry of the type names MySQL
//! reports. Two entry points:
//!
//! - [`ColumnType::parse`] is strict: unknown base names and malformed
//!   arguments are errors. Used for `SHOW COLUMNS` output.
//! - [`ColumnType::reflect`] is lenient: anything unrecognized becomes the
//!   null type class. Used for `information_schema` reflection.
//!
//! `enum` and `set` have no portable representation and are read as
//! `varchar` on the strict path.

use std::fmt;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::typemap::{map_type_class, PortableType};

/// Registry entry: (base name, type class name, accepted argument count)
type TypeSpec = (&'static str, &'static str, usize);

const REGISTRY: &[TypeSpec] = &[
    ("bigint", "BIGINT", 1),
    ("binary", "BINARY", 1),
    ("bit", "BIT", 1),
    ("blob", "BLOB", 1),
    ("boolean", "BOOLEAN", 0),
    ("char", "CHAR", 1),
    ("date", "DATE", 0),
    ("datetime", "DATETIME", 1),
    ("decimal", "DECIMAL", 2),
    ("double", "DOUBLE", 2),
    ("enum", "ENUM", 0),
    ("fixed", "DECIMAL", 2),
    ("float", "FLOAT", 2),
    ("int", "INTEGER", 1),
    ("integer", "INTEGER", 1),
    ("json", "JSON", 0),
    ("longblob", "LONGBLOB", 0),
    ("longtext", "LONGTEXT", 0),
    ("mediumblob", "MEDIUMBLOB", 0),
    ("mediumint", "MEDIUMINT", 1),
    ("mediumtext", "MEDIUMTEXT", 0),
    ("nchar", "NCHAR", 1),
    ("numeric", "NUMERIC", 2),
    ("nvarchar", "NVARCHAR", 1),
    ("real", "REAL", 2),
    ("set", "SET", 0),
    ("smallint", "SMALLINT", 1),
    ("text", "TEXT", 1),
    ("time", "TIME", 1),
    ("timestamp", "TIMESTAMP", 1),
    ("tinyblob", "TINYBLOB", 0),
    ("tinyint", "TINYINT", 1),
    ("tinytext", "TINYTEXT", 0),
    ("varbinary", "VARBINARY", 1),
    ("varchar", "VARCHAR", 1),
    ("year", "YEAR", 1),
];

/// Class name given to columns whose type could not be resolved
pub const NULL_TYPE_CLASS: &str = "NullType";

fn lookup(base: &str) -> Option<&'static TypeSpec> {
    REGISTRY.iter().find(|(name, _, _)| *name == base)
}

/// Split raw type text into (base name, argument text, unsigned flag)
fn split_type_text(type_text: &str) -> (String, Option<&str>, bool) {
    let trimmed = type_text.trim();
    let (head, rest) = match trimmed.split_once('(') {
        Some((head, rest)) => (head, Some(rest)),
        None => (trimmed, None),
    };
    let base = head
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let args = rest.map(|r| {
        let inner = r.split_whitespace().next().unwrap_or_default();
        inner.trim_end_matches(')')
    });
    let unsigned = trimmed
        .split(|c: char| c.is_whitespace() || c == ')')
        .any(|token| token.eq_ignore_ascii_case("unsigned"));
    (base, args, unsigned)
}

fn parse_args(args: &str) -> Option<Vec<u32>> {
    args.split(',').map(|a| a.trim().parse().ok()).collect()
}

/// A concrete native column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    class_name: &'static str,
    args: Vec<u32>,
    unsigned: bool,
}

impl ColumnType {
    /// Build a column type from `SHOW COLUMNS` type text, failing on
    /// anything the registry cannot represent
    pub fn parse(type_text: &str) -> Result<Self> {
        let (mut base, mut args_text, unsigned) = split_type_text(type_text);

        if base == "enum" || base == "set" {
            warn!(
                col_meta_type = %type_text,
                "Enum and Set types not supported for col_meta_type={}. Using varchar instead.",
                type_text
            );
            base = "varchar".to_string();
            args_text = None;
        }

        let Some(&(_, class_name, max_args)) = lookup(&base) else {
            error!(col_meta_type = %type_text, "Error creating column type: unknown base type");
            return Err(Error::unsupported_type(
                type_text,
                format!("unknown base type '{base}'"),
            ));
        };

        let args = match args_text.filter(|a| !a.is_empty()) {
            Some(text) => match parse_args(text) {
                Some(args) if args.len() <= max_args => args,
                Some(args) => {
                    error!(col_meta_type = %type_text, "Error creating column type: too many arguments");
                    return Err(Error::unsupported_type(
                        type_text,
                        format!(
                            "{class_name} takes at most {max_args} argument(s), got {}",
                            args.len()
                        ),
                    ));
                }
                None => {
                    error!(col_meta_type = %type_text, "Error creating column type: malformed arguments");
                    return Err(Error::unsupported_type(
                        type_text,
                        format!("malformed type arguments '{text}'"),
                    ));
                }
            },
            None => Vec::new(),
        };

        Ok(Self {
            class_name,
            args,
            unsigned,
        })
    }

    /// Build a column type from reflected type text, never failing
    ///
    /// `enum`/`set` keep their own class, unknown types resolve to
    /// [`NULL_TYPE_CLASS`].
    pub fn reflect(type_text: &str) -> Self {
        let (base, args_text, unsigned) = split_type_text(type_text);
        match lookup(&base) {
            Some(&(_, class_name, _)) => {
                let args = match class_name {
                    "ENUM" | "SET" => Vec::new(),
                    _ => args_text.and_then(parse_args).unwrap_or_default(),
                };
                Self {
                    class_name,
                    args,
                    unsigned,
                }
            }
            None => Self::null(),
        }
    }

    /// The unresolved type
    pub fn null() -> Self {
        Self {
            class_name: NULL_TYPE_CLASS,
            args: Vec::new(),
            unsigned: false,
        }
    }

    /// Type class name (e.g. `VARCHAR`, `JSON`, `NullType`)
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Integer arguments (length, precision/scale, fractional seconds)
    pub fn args(&self) -> &[u32] {
        &self.args
    }

    /// Whether the type was declared `unsigned`
    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    /// Whether the type could not be resolved
    pub fn is_null_type(&self) -> bool {
        self.class_name == NULL_TYPE_CLASS
    }

    /// Portable type derived from the type class name
    pub fn portable_type(&self) -> PortableType {
        map_type_class(self.class_name)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(u32::to_string).collect();
            write!(f, "({})", args.join(", "))?;
        }
        if self.unsigned {
            f.write_str(" UNSIGNED")?;
        }
        Ok(())
    }
}
