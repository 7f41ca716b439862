//! SQL dialect differences
//!
//! Document bodies live in a single JSON column. PostgreSQL stores it as
//! `JSONB` and uses the path operators; SQLite stores text and uses the JSON1
//! functions. Path segments are validated identifiers, so they are inlined
//! into path literals; values are always bound.

use crate::query::FieldValue;

/// Relational backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL (production)
    Postgres,
    /// SQLite (embedded use and tests)
    Sqlite,
}

/// Cast applied to a JSON path read so comparisons use the bound value's type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueCast {
    Text,
    Numeric,
    Boolean,
}

impl ValueCast {
    pub(crate) fn for_value(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::IntegerList(_) => {
                Self::Numeric
            }
            FieldValue::Boolean(_) => Self::Boolean,
            _ => Self::Text,
        }
    }
}

impl Dialect {
    /// Pick the dialect from a connection URL scheme
    ///
    /// ```rust
    /// use repokit::relational::Dialect;
    ///
    /// assert_eq!(Dialect::from_url("postgres://localhost/app"), Some(Dialect::Postgres));
    /// assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
    /// assert_eq!(Dialect::from_url("mysql://localhost/app"), None);
    /// ```
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    /// Dialect name for logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Numbered placeholder; both backends accept `$n`
    pub(crate) fn placeholder(index: usize) -> String {
        format!("${}", index)
    }

    /// Column type of the document body
    pub(crate) const fn body_type(&self) -> &'static str {
        match self {
            Self::Postgres => "JSONB",
            Self::Sqlite => "TEXT",
        }
    }

    /// Projection reading the body back as text
    pub(crate) const fn select_body(&self) -> &'static str {
        match self {
            Self::Postgres => "data::text AS data",
            Self::Sqlite => "data",
        }
    }

    /// Value expression turning a bound JSON string into a body
    pub(crate) fn json_param(&self, placeholder: &str) -> String {
        match self {
            Self::Postgres => format!("{}::jsonb", placeholder),
            Self::Sqlite => format!("json({})", placeholder),
        }
    }

    /// Scalar read of a body path, cast for comparison
    pub(crate) fn read_path(&self, path: &[String], cast: ValueCast) -> String {
        match self {
            Self::Postgres => {
                let text = format!("(data #>> '{}')", pg_path(path));
                match cast {
                    ValueCast::Text => text,
                    ValueCast::Numeric => format!("({}::numeric)", text),
                    ValueCast::Boolean => format!("({}::boolean)", text),
                }
            }
            Self::Sqlite => format!("json_extract(data, '{}')", sqlite_path(path)),
        }
    }

    /// Sort expression for a body path
    ///
    /// PostgreSQL orders the `jsonb` value itself, which compares numbers
    /// numerically and strings as text.
    pub(crate) fn order_path(&self, path: &[String]) -> String {
        match self {
            Self::Postgres => format!("(data #> '{}')", pg_path(path)),
            Self::Sqlite => format!("json_extract(data, '{}')", sqlite_path(path)),
        }
    }

    /// Write a bound JSON value at `path` inside `expr`
    pub(crate) fn set_path(&self, expr: &str, path: &[String], placeholder: &str) -> String {
        match self {
            Self::Postgres => format!(
                "jsonb_set({}, '{}', {}, true)",
                expr,
                pg_path(path),
                self.json_param(placeholder)
            ),
            Self::Sqlite => format!(
                "json_set({}, '{}', {})",
                expr,
                sqlite_path(path),
                self.json_param(placeholder)
            ),
        }
    }

    /// Remove `path` from `expr`
    pub(crate) fn remove_path(&self, expr: &str, path: &[String]) -> String {
        match self {
            Self::Postgres => format!("({} #- '{}')", expr, pg_path(path)),
            Self::Sqlite => format!("json_remove({}, '{}')", expr, sqlite_path(path)),
        }
    }

    /// Add a bound number to `path`, treating a missing value as zero
    ///
    /// The current value is read from the stored row, so the addition happens
    /// inside the UPDATE statement.
    pub(crate) fn increment_path(&self, expr: &str, path: &[String], placeholder: &str) -> String {
        match self {
            Self::Postgres => format!(
                "jsonb_set({}, '{}', to_jsonb(COALESCE({}, 0) + {}), true)",
                expr,
                pg_path(path),
                self.read_path(path, ValueCast::Numeric),
                placeholder
            ),
            Self::Sqlite => format!(
                "json_set({}, '{}', COALESCE({}, 0) + {})",
                expr,
                sqlite_path(path),
                self.read_path(path, ValueCast::Numeric),
                placeholder
            ),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn pg_path(path: &[String]) -> String {
    format!("{{{}}}", path.join(","))
}

fn sqlite_path(path: &[String]) -> String {
    format!("$.{}", path.join("."))
}
