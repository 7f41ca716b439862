//! QueryModel to parameterized SQL
//!
//! Every value reaches the database as a bind parameter. Identifiers that do
//! appear in the SQL text (table names, JSON path segments) have already
//! passed the identifier grammar checks in [`crate::query`].

use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;

use super::dialect::{Dialect, ValueCast};
use crate::query::{Field, FieldTarget, FieldValue, FilterOperator, QueryModel};
use crate::repository::{
    FindOptions, NewDocument, PatchOp, RepositoryError, RepositoryResult,
};

/// A bound parameter value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bind {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Bind {
    fn scalar(value: &FieldValue) -> RepositoryResult<Self> {
        match value {
            FieldValue::String(s) => Ok(Self::Text(s.clone())),
            FieldValue::Integer(n) => Ok(Self::Int(*n)),
            FieldValue::Float(n) => Ok(Self::Float(*n)),
            FieldValue::Boolean(b) => Ok(Self::Bool(*b)),
            other => Err(RepositoryError::validation_failed(format!(
                "{:?} cannot be bound as a scalar",
                other
            ))),
        }
    }
}

/// SQL text with its binds, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Statement {
    /// sqlx query with every parameter bound
    pub(crate) fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for bind in &self.binds {
            query = match bind {
                Bind::Text(s) => query.bind(s.clone()),
                Bind::Int(n) => query.bind(*n),
                Bind::Float(n) => query.bind(*n),
                Bind::Bool(b) => query.bind(*b),
            };
        }
        query
    }
}

/// Accumulates binds while SQL fragments are rendered
struct SqlCompiler {
    dialect: Dialect,
    binds: Vec<Bind>,
}

impl SqlCompiler {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
        }
    }

    fn bind(&mut self, value: Bind) -> String {
        self.binds.push(value);
        Dialect::placeholder(self.binds.len())
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            binds: self.binds,
        }
    }

    fn expr(&self, target: &FieldTarget, cast: ValueCast) -> String {
        match target {
            FieldTarget::Meta(column) => column.column().to_string(),
            FieldTarget::Body(path) => self.dialect.read_path(path, cast),
        }
    }

    fn condition(&mut self, field: &Field) -> RepositoryResult<String> {
        field.validate()?;
        let target = field.target()?;
        let expr = self.expr(&target, ValueCast::for_value(&field.value));

        let sql = match (field.operator, &field.value) {
            (FilterOperator::IsNull, _) | (FilterOperator::Equal, FieldValue::Null) => {
                format!("{} IS NULL", expr)
            }
            (FilterOperator::IsNotNull, _) | (FilterOperator::NotEqual, FieldValue::Null) => {
                format!("{} IS NOT NULL", expr)
            }
            (FilterOperator::In, FieldValue::StringList(items)) => {
                let binds = items.iter().map(|s| Bind::Text(s.clone())).collect();
                self.in_list(&expr, binds)
            }
            (FilterOperator::In, FieldValue::IntegerList(items)) => {
                let binds = items.iter().map(|n| Bind::Int(*n)).collect();
                self.in_list(&expr, binds)
            }
            (FilterOperator::In, FieldValue::Null) => "1 = 0".to_string(),
            (FilterOperator::In, value) => {
                let placeholder = self.bind(Bind::scalar(value)?);
                format!("{} = {}", expr, placeholder)
            }
            (op, value) => {
                let placeholder = self.bind(Bind::scalar(value)?);
                format!("{} {} {}", expr, op.as_sql(), placeholder)
            }
        };
        Ok(sql)
    }

    fn in_list(&mut self, expr: &str, binds: Vec<Bind>) -> String {
        if binds.is_empty() {
            return "1 = 0".to_string();
        }
        let placeholders: Vec<String> = binds.into_iter().map(|b| self.bind(b)).collect();
        format!("{} IN ({})", expr, placeholders.join(", "))
    }

    fn where_clause(&mut self, model: &QueryModel) -> RepositoryResult<String> {
        let mut parts = Vec::with_capacity(model.conditions.len() + 1);
        for field in &model.conditions {
            parts.push(self.condition(field)?);
        }

        if !model.or_groups.is_empty() {
            let mut groups = Vec::with_capacity(model.or_groups.len());
            for group in &model.or_groups {
                if group.is_empty() {
                    groups.push("(1 = 1)".to_string());
                    continue;
                }
                let mut conjuncts = Vec::with_capacity(group.len());
                for field in group {
                    conjuncts.push(self.condition(field)?);
                }
                groups.push(format!("({})", conjuncts.join(" AND ")));
            }
            parts.push(format!("({})", groups.join(" OR ")));
        }

        if parts.is_empty() {
            Ok("1 = 1".to_string())
        } else {
            Ok(parts.join(" AND "))
        }
    }

    fn order_clause(&self, options: &FindOptions) -> RepositoryResult<String> {
        let terms = options
            .resolved_sort()?
            .into_iter()
            .map(|(target, key)| {
                let expr = match target {
                    FieldTarget::Meta(column) => column.column().to_string(),
                    FieldTarget::Body(path) => self.dialect.order_path(&path),
                };
                format!("{} {}", expr, key.order.as_sql())
            })
            .collect::<Vec<_>>();
        if terms.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" ORDER BY {}", terms.join(", ")))
        }
    }

    fn window_clause(&self, options: &FindOptions) -> String {
        match (options.limit, options.skip) {
            (Some(limit), Some(skip)) => format!(" LIMIT {} OFFSET {}", limit, skip),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(skip)) => match self.dialect {
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", skip),
                Dialect::Postgres => format!(" OFFSET {}", skip),
            },
            (None, None) => String::new(),
        }
    }

    fn patched_body(&mut self, ops: &[PatchOp]) -> RepositoryResult<String> {
        let mut expr = "data".to_string();
        for op in ops {
            expr = match op {
                PatchOp::Set(path, value) => {
                    let placeholder = self.bind(Bind::Text(value.to_string()));
                    self.dialect.set_path(&expr, path, &placeholder)
                }
                PatchOp::Increment(path, delta) => {
                    let bind = match delta {
                        FieldValue::Float(n) => Bind::Float(*n),
                        FieldValue::Integer(n) => Bind::Int(*n),
                        other => {
                            return Err(RepositoryError::validation_failed(format!(
                                "increment for '{}' must be a number, got {:?}",
                                path.join("."),
                                other
                            )))
                        }
                    };
                    let placeholder = self.bind(bind);
                    self.dialect.increment_path(&expr, path, &placeholder)
                }
                PatchOp::Unset(path) => self.dialect.remove_path(&expr, path),
            };
        }
        Ok(expr)
    }
}

fn quote(table: &str) -> String {
    format!("\"{}\"", table)
}

/// DDL creating the collection table and its owner index
pub(crate) fn create_collection(dialect: Dialect, table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, owner_id TEXT NOT NULL, \
             created_at BIGINT NOT NULL, updated_at BIGINT NOT NULL, data {} NOT NULL)",
            quote(table),
            dialect.body_type()
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (owner_id)",
            quote(&format!("idx_{}_owner_id", table)),
            quote(table)
        ),
    ]
}

pub(crate) fn insert(dialect: Dialect, table: &str, document: &NewDocument) -> Statement {
    let mut c = SqlCompiler::new(dialect);
    let id = c.bind(Bind::Text(document.id.clone()));
    let owner = c.bind(Bind::Text(document.owner_id.clone()));
    let created = c.bind(Bind::Int(document.created_at));
    let updated = c.bind(Bind::Int(document.updated_at));
    let body = serde_json::Value::Object(document.data.clone()).to_string();
    let data = c.bind(Bind::Text(body));
    let sql = format!(
        "INSERT INTO {} (id, owner_id, created_at, updated_at, data) VALUES ({}, {}, {}, {}, {})",
        quote(table),
        id,
        owner,
        created,
        updated,
        dialect.json_param(&data)
    );
    c.finish(sql)
}

pub(crate) fn select(
    dialect: Dialect,
    table: &str,
    model: &QueryModel,
    options: &FindOptions,
) -> RepositoryResult<Statement> {
    let mut c = SqlCompiler::new(dialect);
    let predicate = c.where_clause(model)?;
    let order = c.order_clause(options)?;
    let sql = format!(
        "SELECT id, owner_id, created_at, updated_at, {} FROM {} WHERE {}{}{}",
        dialect.select_body(),
        quote(table),
        predicate,
        order,
        c.window_clause(options)
    );
    Ok(c.finish(sql))
}

pub(crate) fn count(dialect: Dialect, table: &str, model: &QueryModel) -> RepositoryResult<Statement> {
    let mut c = SqlCompiler::new(dialect);
    let predicate = c.where_clause(model)?;
    let sql = format!(
        "SELECT COUNT(*) AS total FROM {} WHERE {}",
        quote(table),
        predicate
    );
    Ok(c.finish(sql))
}

pub(crate) fn update(
    dialect: Dialect,
    table: &str,
    model: &QueryModel,
    ops: &[PatchOp],
    multi: bool,
    now: i64,
) -> RepositoryResult<Statement> {
    let mut c = SqlCompiler::new(dialect);
    let body = c.patched_body(ops)?;
    let updated = c.bind(Bind::Int(now));
    let predicate = c.where_clause(model)?;
    let filter = if multi {
        predicate
    } else {
        format!(
            "id IN (SELECT id FROM {} WHERE {} LIMIT 1)",
            quote(table),
            predicate
        )
    };
    let sql = format!(
        "UPDATE {} SET data = {}, updated_at = {} WHERE {}",
        quote(table),
        body,
        updated,
        filter
    );
    Ok(c.finish(sql))
}

pub(crate) fn update_owned(
    dialect: Dialect,
    table: &str,
    id: &str,
    owner_id: &str,
    ops: &[PatchOp],
    now: i64,
) -> RepositoryResult<Statement> {
    let mut c = SqlCompiler::new(dialect);
    let body = c.patched_body(ops)?;
    let updated = c.bind(Bind::Int(now));
    let id = c.bind(Bind::Text(id.to_string()));
    let owner = c.bind(Bind::Text(owner_id.to_string()));
    let sql = format!(
        "UPDATE {} SET data = {}, updated_at = {} WHERE id = {} AND owner_id = {}",
        quote(table),
        body,
        updated,
        id,
        owner
    );
    Ok(c.finish(sql))
}

pub(crate) fn delete(dialect: Dialect, table: &str, model: &QueryModel) -> RepositoryResult<Statement> {
    let mut c = SqlCompiler::new(dialect);
    let predicate = c.where_clause(model)?;
    let sql = format!("DELETE FROM {} WHERE {}", quote(table), predicate);
    Ok(c.finish(sql))
}

pub(crate) fn delete_owned(dialect: Dialect, table: &str, id: &str, owner_id: &str) -> Statement {
    let mut c = SqlCompiler::new(dialect);
    let id = c.bind(Bind::Text(id.to_string()));
    let owner = c.bind(Bind::Text(owner_id.to_string()));
    let sql = format!(
        "DELETE FROM {} WHERE id = {} AND owner_id = {}",
        quote(table),
        id,
        owner
    );
    c.finish(sql)
}
