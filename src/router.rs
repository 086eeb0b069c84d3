//! Query router: predicate + catalog → (view, rewritten SQL, parameters).
//!
//! The deepest scope level any field reference touches picks the view: a row of a deeper join
//! already carries every shallower entity's columns. Each reference is then rewritten against the
//! column alias the chosen view uses for that reference's own level. Caller values (literals,
//! JSON paths, paging) are always bound parameters; only catalog identifiers reach the SQL text.

use rusqlite::types::Value as SqlValue;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::ScopeLevel;
use crate::catalog::{ViewCatalog, ViewDescriptor};
use crate::error::RoutingError;
use crate::predicate::{CompareOp, FieldRef, Literal, Predicate, SearchRequest};

/// Output of [`route`]. Identical requests produce byte-identical `sql` and equal `params`.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedQuery {
    pub scope_level: ScopeLevel,
    pub view_name: String,
    /// Rewritten predicate alone (parameter numbers match `params`).
    pub where_clause: String,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Scope level of one field reference, validating its qualifier and path.
pub fn scope_of_field(catalog: &ViewCatalog, field: &FieldRef) -> Result<ScopeLevel, RoutingError> {
    if !valid_path(&field.path) {
        return Err(RoutingError::InvalidField {
            field: field.display_name(),
        });
    }
    catalog
        .scope_of(field.qualifier.as_deref())
        .ok_or_else(|| RoutingError::UnknownQualifier {
            qualifier: field.qualifier.clone().unwrap_or_default(),
            field: field.display_name(),
        })
}

/// Predicate reference set: every scope level the request's fields touch.
pub fn reference_set(
    catalog: &ViewCatalog,
    request: &SearchRequest,
) -> Result<BTreeSet<ScopeLevel>, RoutingError> {
    request_fields(request)
        .into_iter()
        .map(|f| scope_of_field(catalog, f))
        .collect()
}

/// Route a full search request (predicate, sort, paging).
pub fn route(catalog: &ViewCatalog, request: &SearchRequest) -> Result<RoutedQuery, RoutingError> {
    let scope_level = reference_set(catalog, request)?
        .into_iter()
        .fold(ScopeLevel::Base, ScopeLevel::max);
    let view = catalog.view(scope_level);

    let mut w = SqlWriter::new(catalog, view);
    w.predicate(&request.predicate)?;
    let where_clause = std::mem::take(&mut w.sql);

    let id = format!("{}.{}", view.view_name, catalog.id_column());
    let doc = w.column(ScopeLevel::Base)?;
    let mut sql = format!(
        "SELECT {id}, {doc} FROM {} WHERE {where_clause}",
        view.view_name
    );
    if scope_level > ScopeLevel::Base {
        // One joined row per holdings/item; a record matches once.
        let _ = write!(sql, " GROUP BY {id}");
    }
    if !request.sort.is_empty() {
        let mut keys = Vec::with_capacity(request.sort.len());
        for key in &request.sort {
            let expr = w.field_expr(&key.field)?;
            let dir = if key.descending { "DESC" } else { "ASC" };
            if scope_level > ScopeLevel::Base {
                // Grouped rows sort on their smallest value ascending, largest descending.
                let agg = if key.descending { "MAX" } else { "MIN" };
                keys.push(format!("{agg}({expr}) {dir}"));
            } else {
                keys.push(format!("{expr} {dir}"));
            }
        }
        let _ = write!(sql, " ORDER BY {}", keys.join(", "));
    }
    if request.limit.is_some() || request.offset > 0 {
        // SQLite needs a LIMIT for OFFSET; -1 means unbounded.
        let limit = request
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let offset = i64::try_from(request.offset).unwrap_or(i64::MAX);
        let l = w.bind(SqlValue::Integer(limit));
        let o = w.bind(SqlValue::Integer(offset));
        let _ = write!(sql, " LIMIT {l} OFFSET {o}");
    }

    Ok(RoutedQuery {
        scope_level,
        view_name: view.view_name.clone(),
        where_clause,
        sql,
        params: w.params,
    })
}

/// Route a bare predicate (no paging, no ordering).
pub fn route_predicate(
    catalog: &ViewCatalog,
    predicate: &Predicate,
) -> Result<RoutedQuery, RoutingError> {
    route(catalog, &SearchRequest::new(predicate.clone()))
}

fn request_fields(request: &SearchRequest) -> Vec<&FieldRef> {
    let mut fields = request.predicate.fields();
    fields.extend(request.sort.iter().map(|k| &k.field));
    fields
}

fn valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// CQL wildcards to a LIKE pattern with `\` as escape: `*` → `%`, `?` → `_`, `\x` is literal `x`.
/// A trailing lone `\` stays a literal backslash.
pub fn cql_wildcard_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '\\' => {
                let next = chars.next().unwrap_or('\\');
                push_like_literal(&mut out, next);
            }
            other => push_like_literal(&mut out, other),
        }
    }
    out
}

fn push_like_literal(out: &mut String, c: char) {
    if matches!(c, '%' | '_' | '\\') {
        out.push('\\');
    }
    out.push(c);
}

/// SQL operator for plain comparisons; `None` for wildcard matching.
fn comparison_symbol(op: CompareOp) -> Option<&'static str> {
    match op {
        CompareOp::Eq => Some("="),
        CompareOp::NotEq => Some("<>"),
        CompareOp::Lt => Some("<"),
        CompareOp::Le => Some("<="),
        CompareOp::Gt => Some(">"),
        CompareOp::Ge => Some(">="),
        CompareOp::Matches => None,
    }
}

fn literal_value(lit: &Literal) -> SqlValue {
    match lit {
        Literal::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Literal::Integer(n) => SqlValue::Integer(*n),
        Literal::Real(r) => SqlValue::Real(*r),
        Literal::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn literal_text(lit: &Literal) -> String {
    match lit {
        Literal::Bool(b) => b.to_string(),
        Literal::Integer(n) => n.to_string(),
        Literal::Real(r) => r.to_string(),
        Literal::Text(s) => s.clone(),
    }
}

struct SqlWriter<'a> {
    catalog: &'a ViewCatalog,
    view: &'a ViewDescriptor,
    sql: String,
    params: Vec<SqlValue>,
}

impl<'a> SqlWriter<'a> {
    fn new(catalog: &'a ViewCatalog, view: &'a ViewDescriptor) -> Self {
        Self {
            catalog,
            view,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    /// Column for an entity level in the chosen view. The view covers every level up to its own,
    /// and routing never picks a view shallower than a referenced level.
    fn column(&self, level: ScopeLevel) -> Result<String, RoutingError> {
        self.view
            .qualified_column(level)
            .ok_or_else(|| RoutingError::InvalidField {
                field: format!("{}.<{}>", self.view.view_name, level),
            })
    }

    fn field_expr(&mut self, field: &FieldRef) -> Result<String, RoutingError> {
        let level = scope_of_field(self.catalog, field)?;
        let column = self.column(level)?;
        let path = self.bind(SqlValue::Text(format!("$.{}", field.path)));
        Ok(format!("json_extract({column}, {path})"))
    }

    fn predicate(&mut self, p: &Predicate) -> Result<(), RoutingError> {
        match p {
            Predicate::All => self.sql.push_str("1 = 1"),
            Predicate::Compare { field, op, value } => {
                let expr = self.field_expr(field)?;
                let clause = match comparison_symbol(*op) {
                    Some(sym) => {
                        let v = self.bind(literal_value(value));
                        format!("{expr} {sym} {v}")
                    }
                    None => {
                        let pattern = self.bind(SqlValue::Text(cql_wildcard_to_like(
                            &literal_text(value),
                        )));
                        format!("{expr} LIKE {pattern} ESCAPE '\\'")
                    }
                };
                self.sql.push_str(&clause);
            }
            Predicate::And(children) => self.junction(children, " AND ", "1 = 1")?,
            Predicate::Or(children) => self.junction(children, " OR ", "1 = 0")?,
            Predicate::Not(inner) => {
                self.sql.push_str("NOT (");
                self.predicate(inner)?;
                self.sql.push(')');
            }
        }
        Ok(())
    }

    fn junction(
        &mut self,
        children: &[Predicate],
        sep: &str,
        empty: &str,
    ) -> Result<(), RoutingError> {
        if children.is_empty() {
            self.sql.push_str(empty);
            return Ok(());
        }
        self.sql.push('(');
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            self.predicate(child)?;
        }
        self.sql.push(')');
        Ok(())
    }
}
