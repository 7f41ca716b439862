//! QueryModel to SurrealQL
//!
//! Records carry the envelope as top-level fields (`key`, `owner_id`,
//! `created_at`, `updated_at`) and the body under `data`. Every value is a
//! query variable; variable names carry a per-script prefix so scripts can be
//! concatenated into one transaction without collisions.

use serde_json::{Map, Value};

use crate::error::DOCUMENT_NOT_FOUND_MARKER;
use crate::query::{Field, FieldTarget, FieldValue, FilterOperator, MetaColumn, QueryModel};
use crate::repository::{FindOptions, NewDocument, PatchOp, RepositoryError, RepositoryResult};

/// SurrealQL text with its variables
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Script {
    pub sql: String,
    pub vars: Map<String, Value>,
}

/// Merge buffered write scripts into one transaction
pub(crate) fn transaction(scripts: Vec<Script>) -> Script {
    let mut sql = String::from("BEGIN TRANSACTION;\n");
    let mut vars = Map::new();
    for script in scripts {
        sql.push_str(&script.sql);
        sql.push('\n');
        vars.extend(script.vars);
    }
    sql.push_str("COMMIT TRANSACTION;");
    Script { sql, vars }
}

/// Prefix of the error that aborts a rehearsal, followed by the affected count
pub(crate) const REHEARSAL_MARKER: &str = "repokit:rehearsed:";

/// Replay `pending` and `script` in a transaction that always aborts
///
/// The closing THROW carries the size of `$changed` as left by `script`, so
/// the caller learns what the write would do once committed without
/// committing anything.
pub(crate) fn rehearsal(pending: Vec<Script>, script: Script) -> Script {
    let mut scripts = pending;
    scripts.push(script);
    scripts.push(Script {
        sql: format!(
            "THROW string::concat(\"{}\", array::len($changed ?? []));",
            REHEARSAL_MARKER
        ),
        vars: Map::new(),
    });
    transaction(scripts)
}

/// Affected count reported by an aborted rehearsal, if `message` is one
pub(crate) fn rehearsed_count(message: &str) -> Option<u64> {
    let start = message.find(REHEARSAL_MARKER)? + REHEARSAL_MARKER.len();
    let digits: String = message[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Allocates prefixed variable names while SurrealQL is rendered
struct ScriptBuilder {
    prefix: String,
    vars: Map<String, Value>,
    next: usize,
}

impl ScriptBuilder {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            vars: Map::new(),
            next: 0,
        }
    }

    fn bind(&mut self, value: Value) -> String {
        let name = format!("{}_p{}", self.prefix, self.next);
        self.next += 1;
        self.vars.insert(name.clone(), value);
        format!("${}", name)
    }

    fn table(&mut self, collection: &str) -> String {
        let name = format!("{}_tb", self.prefix);
        self.vars.insert(name.clone(), Value::from(collection));
        format!("${}", name)
    }

    fn finish(self, sql: String) -> Script {
        Script {
            sql,
            vars: self.vars,
        }
    }

    fn condition(&mut self, field: &Field) -> RepositoryResult<String> {
        field.validate()?;
        let target = field.target()?;
        let expr = field_expr(&target);
        let body = matches!(target, FieldTarget::Body(_));

        let sql = match (field.operator, &field.value) {
            (FilterOperator::IsNull, _) | (FilterOperator::Equal, FieldValue::Null) => {
                format!("({expr} = NONE OR {expr} = NULL)")
            }
            (FilterOperator::IsNotNull, _) | (FilterOperator::NotEqual, FieldValue::Null) => {
                present(&expr)
            }
            (FilterOperator::In, FieldValue::Null) => "false".to_string(),
            (FilterOperator::In, value) if value.is_list() => match value.to_json() {
                Value::Array(items) if items.is_empty() => "false".to_string(),
                list => format!("{} INSIDE {}", expr, self.bind(list)),
            },
            (FilterOperator::In, value) => format!("{} = {}", expr, self.bind(value.to_json())),
            (FilterOperator::Like, FieldValue::String(pattern))
                if pattern.trim_matches('%').is_empty() =>
            {
                present(&expr)
            }
            (FilterOperator::Like, FieldValue::String(pattern)) => {
                let matcher = self.like(&expr, pattern)?;
                guarded(body, &expr, matcher)
            }
            (FilterOperator::Equal, value) => format!("{} = {}", expr, self.bind(value.to_json())),
            (op, value) => {
                let comparison = format!("{} {} {}", expr, op.as_sql(), self.bind(value.to_json()));
                guarded(body, &expr, comparison)
            }
        };
        Ok(sql)
    }

    /// Translate a `%` pattern into string functions
    ///
    /// Only leading and trailing wildcards are supported; `_` is literal.
    fn like(&mut self, expr: &str, pattern: &str) -> RepositoryResult<String> {
        let trimmed_start = pattern.trim_start_matches('%');
        let inner = trimmed_start.trim_end_matches('%');
        if inner.contains('%') {
            return Err(RepositoryError::validation_failed(format!(
                "pattern '{}' has an interior wildcard, which the document store cannot match",
                pattern
            )));
        }
        let leading = trimmed_start.len() < pattern.len();
        let trailing = inner.len() < trimmed_start.len();
        let value = self.bind(Value::from(inner));
        let text = format!("<string> {}", expr);
        Ok(match (leading, trailing) {
            (false, false) => format!("{} = {}", expr, value),
            (false, true) => format!("string::starts_with({}, {})", text, value),
            (true, false) => format!("string::ends_with({}, {})", text, value),
            (true, true) => format!("string::contains({}, {})", text, value),
        })
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
                    groups.push("(true)".to_string());
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
            Ok("true".to_string())
        } else {
            Ok(parts.join(" AND "))
        }
    }

    fn assignments(&mut self, ops: &[PatchOp], now: i64) -> String {
        let mut sets = Vec::with_capacity(ops.len() + 1);
        for op in ops {
            let path = body_path(op.path());
            sets.push(match op {
                PatchOp::Set(_, value) => format!("{} = {}", path, self.bind(value.clone())),
                PatchOp::Increment(_, delta) => {
                    format!("{path} = ({path} ?? 0) + {}", self.bind(delta.to_json()))
                }
                PatchOp::Unset(_) => format!("{} = NONE", path),
            });
        }
        sets.push(format!("updated_at = {}", self.bind(Value::from(now))));
        sets.join(", ")
    }
}

fn present(expr: &str) -> String {
    format!("({expr} != NONE AND {expr} != NULL)")
}

/// Missing body values never satisfy an ordering comparison
fn guarded(body: bool, expr: &str, condition: String) -> String {
    if body {
        format!("({expr} != NONE AND {expr} != NULL AND {condition})")
    } else {
        condition
    }
}

fn body_path(path: &[String]) -> String {
    let mut idiom = String::from("data");
    for segment in path {
        idiom.push_str(".`");
        idiom.push_str(segment);
        idiom.push('`');
    }
    idiom
}

fn field_expr(target: &FieldTarget) -> String {
    match target {
        FieldTarget::Meta(MetaColumn::Id) => "key".to_string(),
        FieldTarget::Meta(column) => column.column().to_string(),
        FieldTarget::Body(path) => body_path(path),
    }
}

fn order_clause(options: &FindOptions) -> RepositoryResult<String> {
    let terms = options
        .resolved_sort()?
        .into_iter()
        .map(|(target, key)| format!("{} {}", field_expr(&target), key.order.as_sql()))
        .collect::<Vec<_>>();
    if terms.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }
}

fn window_clause(options: &FindOptions) -> String {
    let mut clause = String::new();
    if let Some(limit) = options.limit {
        clause.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(skip) = options.skip {
        clause.push_str(&format!(" START {}", skip));
    }
    clause
}

fn throw_when_unchanged() -> String {
    format!(
        "IF array::len($changed) = 0 {{ THROW \"{}\" }};",
        DOCUMENT_NOT_FOUND_MARKER
    )
}

/// Table and owner index definitions
pub(crate) fn define_collection(collection: &str) -> Script {
    let sql = format!(
        "DEFINE TABLE IF NOT EXISTS `{tb}` SCHEMALESS;\n\
         DEFINE INDEX IF NOT EXISTS `idx_{tb}_key` ON TABLE `{tb}` FIELDS key UNIQUE;\n\
         DEFINE INDEX IF NOT EXISTS `idx_{tb}_owner_id` ON TABLE `{tb}` FIELDS owner_id;",
        tb = collection
    );
    Script {
        sql,
        vars: Map::new(),
    }
}

pub(crate) fn insert(prefix: &str, collection: &str, document: &NewDocument) -> Script {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let key = b.bind(Value::from(document.id.as_str()));
    let mut body = Map::new();
    body.insert("key".to_string(), Value::from(document.id.as_str()));
    body.insert("owner_id".to_string(), Value::from(document.owner_id.as_str()));
    body.insert("created_at".to_string(), Value::from(document.created_at));
    body.insert("updated_at".to_string(), Value::from(document.updated_at));
    body.insert("data".to_string(), Value::Object(document.data.clone()));
    let content = b.bind(Value::Object(body));
    let sql = format!(
        "CREATE type::thing({}, {}) CONTENT {} RETURN NONE;",
        table, key, content
    );
    b.finish(sql)
}

pub(crate) fn select(
    prefix: &str,
    collection: &str,
    model: &QueryModel,
    options: &FindOptions,
) -> RepositoryResult<Script> {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let predicate = b.where_clause(model)?;
    let sql = format!(
        "SELECT * OMIT id FROM type::table({}) WHERE {}{}{};",
        table,
        predicate,
        order_clause(options)?,
        window_clause(options)
    );
    Ok(b.finish(sql))
}

pub(crate) fn count(prefix: &str, collection: &str, model: &QueryModel) -> RepositoryResult<Script> {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let predicate = b.where_clause(model)?;
    let sql = format!(
        "SELECT count() AS total FROM type::table({}) WHERE {} GROUP ALL;",
        table, predicate
    );
    Ok(b.finish(sql))
}

pub(crate) fn update(
    prefix: &str,
    collection: &str,
    model: &QueryModel,
    ops: &[PatchOp],
    multi: bool,
    now: i64,
) -> RepositoryResult<Script> {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let predicate = b.where_clause(model)?;
    let sets = b.assignments(ops, now);
    let sql = if multi {
        format!(
            "LET $changed = (UPDATE type::table({}) SET {} WHERE {} RETURN AFTER);\n\
             array::len($changed);",
            table, sets, predicate
        )
    } else {
        format!(
            "LET $target = (SELECT VALUE id FROM type::table({}) WHERE {} LIMIT 1);\n\
             LET $changed = (UPDATE $target SET {} RETURN AFTER);\n\
             array::len($changed);",
            table, predicate, sets
        )
    };
    Ok(b.finish(sql))
}

pub(crate) fn update_owned(
    prefix: &str,
    collection: &str,
    id: &str,
    owner_id: &str,
    ops: &[PatchOp],
    now: i64,
) -> Script {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let key = b.bind(Value::from(id));
    let owner = b.bind(Value::from(owner_id));
    let sets = b.assignments(ops, now);
    let sql = format!(
        "LET $changed = (UPDATE type::thing({}, {}) SET {} WHERE owner_id = {} RETURN AFTER);\n{}",
        table,
        key,
        sets,
        owner,
        throw_when_unchanged()
    );
    b.finish(sql)
}

pub(crate) fn delete(prefix: &str, collection: &str, model: &QueryModel) -> RepositoryResult<Script> {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let predicate = b.where_clause(model)?;
    let sql = format!(
        "LET $changed = (DELETE type::table({}) WHERE {} RETURN BEFORE);\n\
         array::len($changed);",
        table, predicate
    );
    Ok(b.finish(sql))
}

pub(crate) fn delete_owned(prefix: &str, collection: &str, id: &str, owner_id: &str) -> Script {
    let mut b = ScriptBuilder::new(prefix);
    let table = b.table(collection);
    let key = b.bind(Value::from(id));
    let owner = b.bind(Value::from(owner_id));
    let sql = format!(
        "LET $changed = (DELETE type::thing({}, {}) WHERE owner_id = {} RETURN BEFORE);\n{}",
        table,
        key,
        owner,
        throw_when_unchanged()
    );
    b.finish(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;
    use crate::repository::{Patch, RepositoryErrorKind};
    use serde_json::json;

    #[test]
    fn test_select_with_cursor_groups() {
        let model = QueryModel::from_conditions([Field::eq("status", "published")])
            .with_or_group(vec![Field::lt("votes", 10_i64)])
            .with_or_group(vec![Field::eq("votes", 10_i64), Field::lt("id", "p_9")]);
        let options = FindOptions::new()
            .sort_by(SortKey::desc("votes"))
            .sort_by(SortKey::desc("id"))
            .with_limit(3);

        let script = select("q", "posts", &model, &options).unwrap();
        assert_eq!(
            script.sql,
            "SELECT * OMIT id FROM type::table($q_tb) WHERE data.`status` = $q_p0 AND \
             (((data.`votes` != NONE AND data.`votes` != NULL AND data.`votes` < $q_p1)) OR \
             (data.`votes` = $q_p2 AND key < $q_p3)) \
             ORDER BY data.`votes` DESC, key DESC LIMIT 3;"
        );
        assert_eq!(script.vars["q_tb"], json!("posts"));
        assert_eq!(script.vars["q_p1"], json!(10));
        assert_eq!(script.vars["q_p3"], json!("p_9"));
    }

    #[test]
    fn test_null_in_and_window() {
        let model = QueryModel::from_conditions([
            Field::is_null("deleted_at"),
            Field::in_list("tags", vec!["rust".to_string()]),
            Field::in_list("ids", Vec::<i64>::new()),
            Field::eq("ownerId", "u_1"),
        ]);
        let options = FindOptions::new().with_skip(4);
        let script = select("s1", "posts", &model, &options).unwrap();
        assert_eq!(
            script.sql,
            "SELECT * OMIT id FROM type::table($s1_tb) WHERE \
             (data.`deleted_at` = NONE OR data.`deleted_at` = NULL) AND \
             data.`tags` INSIDE $s1_p0 AND false AND owner_id = $s1_p1 START 4;"
        );
        assert_eq!(script.vars["s1_p0"], json!(["rust"]));
    }

    #[test]
    fn test_like_translation() {
        let mut b = ScriptBuilder::new("q");
        assert_eq!(
            b.condition(&Field::like("title", "Rust%")).unwrap(),
            "(data.`title` != NONE AND data.`title` != NULL AND \
             string::starts_with(<string> data.`title`, $q_p0))"
        );
        assert_eq!(b.vars["q_p0"], json!("Rust"));
        assert!(b
            .condition(&Field::like("title", "%async%"))
            .unwrap()
            .contains("string::contains(<string> data.`title`, $q_p1)"));
        assert!(b
            .condition(&Field::like("title", "%.rs"))
            .unwrap()
            .contains("string::ends_with"));
        assert_eq!(
            b.condition(&Field::like("id", "p_1")).unwrap(),
            "key = $q_p3"
        );
        assert_eq!(
            b.condition(&Field::like("title", "%")).unwrap(),
            "(data.`title` != NONE AND data.`title` != NULL)"
        );

        let err = b.condition(&Field::like("title", "a%b")).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    }

    #[test]
    fn test_update_scripts() {
        let ops = Patch::new()
            .set("title", json!("Edited"))
            .increment("stats.views", 2_i64)
            .unset("draft")
            .resolve()
            .unwrap();
        let model = QueryModel::from_conditions([Field::eq("owner_id", "u_1")]);

        let script = update("q", "posts", &model, &ops, true, 42).unwrap();
        assert_eq!(
            script.sql,
            "LET $changed = (UPDATE type::table($q_tb) SET data.`title` = $q_p1, \
             data.`stats`.`views` = (data.`stats`.`views` ?? 0) + $q_p2, data.`draft` = NONE, \
             updated_at = $q_p3 WHERE owner_id = $q_p0 RETURN AFTER);\n\
             array::len($changed);"
        );
        assert_eq!(script.vars["q_p3"], json!(42));

        let script = update("q", "posts", &model, &ops[..1], false, 42).unwrap();
        assert!(script.sql.starts_with(
            "LET $target = (SELECT VALUE id FROM type::table($q_tb) WHERE owner_id = $q_p0 LIMIT 1);\n\
             LET $changed = (UPDATE $target SET data.`title` = $q_p1"
        ));
    }

    #[test]
    fn test_owned_scripts_throw_when_unchanged() {
        let ops = Patch::new().set("title", json!("t")).resolve().unwrap();
        let script = update_owned("q", "posts", "p_1", "u_1", &ops, 1);
        assert_eq!(
            script.sql,
            "LET $changed = (UPDATE type::thing($q_tb, $q_p0) SET data.`title` = $q_p2, \
             updated_at = $q_p3 WHERE owner_id = $q_p1 RETURN AFTER);\n\
             IF array::len($changed) = 0 { THROW \"repokit:not_found\" };"
        );

        let script = delete_owned("q", "posts", "p_1", "u_1");
        assert!(script.sql.starts_with(
            "LET $changed = (DELETE type::thing($q_tb, $q_p0) WHERE owner_id = $q_p1 RETURN BEFORE);"
        ));
        assert!(script.sql.contains(DOCUMENT_NOT_FOUND_MARKER));
    }

    #[test]
    fn test_insert_and_count() {
        let doc = NewDocument::new("p_1", "u_1", json!({"votes": 1}).as_object().cloned().unwrap())
            .with_timestamps(3, 4);
        let script = insert("q", "posts", &doc);
        assert_eq!(
            script.sql,
            "CREATE type::thing($q_tb, $q_p0) CONTENT $q_p1 RETURN NONE;"
        );
        assert_eq!(
            script.vars["q_p1"],
            json!({"key": "p_1", "owner_id": "u_1", "created_at": 3, "updated_at": 4, "data": {"votes": 1}})
        );

        let script = count("q", "posts", &QueryModel::new()).unwrap();
        assert_eq!(
            script.sql,
            "SELECT count() AS total FROM type::table($q_tb) WHERE true GROUP ALL;"
        );
    }

    #[test]
    fn test_transaction_merges_scripts() {
        let first = insert("a", "posts", &NewDocument::new("p_1", "u_1", Map::new()));
        let second = delete_owned("b", "posts", "p_2", "u_1");
        let merged = transaction(vec![first, second]);

        assert!(merged.sql.starts_with("BEGIN TRANSACTION;\nCREATE"));
        assert!(merged.sql.ends_with("COMMIT TRANSACTION;"));
        assert!(merged.vars.contains_key("a_tb"));
        assert!(merged.vars.contains_key("b_p1"));
        assert_eq!(merged.vars.len(), 6);
    }

    #[test]
    fn test_rehearsal_always_aborts() {
        let pending = vec![insert("a", "posts", &NewDocument::new("p_1", "u_1", Map::new()))];
        let ops = Patch::new().set("title", json!("t")).resolve().unwrap();
        let current = update_owned("b", "posts", "p_1", "u_1", &ops, 1);
        let script = rehearsal(pending, current);

        assert!(script.sql.starts_with("BEGIN TRANSACTION;\nCREATE"));
        assert!(script.sql.ends_with(
            "THROW string::concat(\"repokit:rehearsed:\", array::len($changed ?? []));\n\
             COMMIT TRANSACTION;"
        ));
        assert!(script.vars.contains_key("a_tb"));
        assert!(script.vars.contains_key("b_p0"));
    }

    #[test]
    fn test_rehearsed_count() {
        assert_eq!(rehearsed_count("An error occurred: repokit:rehearsed:3"), Some(3));
        assert_eq!(rehearsed_count("An error occurred: 'repokit:rehearsed:0'"), Some(0));
        assert_eq!(rehearsed_count("An error occurred: repokit:not_found"), None);
        assert_eq!(rehearsed_count("repokit:rehearsed:"), None);
    }

    #[test]
    fn test_define_collection() {
        let script = define_collection("posts");
        assert!(script.sql.contains("DEFINE TABLE IF NOT EXISTS `posts` SCHEMALESS;"));
        assert!(script.sql.contains("FIELDS owner_id;"));
        assert!(script.vars.is_empty());
    }
}
