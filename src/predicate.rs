//! Parsed predicate tree: the router's input. The CQL parser lives upstream; trees arrive as
//! values of these types (or as their JSON form).

use serde::{Deserialize, Serialize};

/// Field reference. `qualifier` is the relationship path (e.g. `holdingsRecords`), `path` the
/// dotted JSON path inside that entity's document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub path: String,
}

impl FieldRef {
    pub fn base(path: &str) -> Self {
        Self {
            qualifier: None,
            path: path.to_string(),
        }
    }

    pub fn qualified(qualifier: &str, path: &str) -> Self {
        Self {
            qualifier: Some(qualifier.to_string()),
            path: path.to_string(),
        }
    }

    /// Name as written in the query, for error messages.
    pub fn display_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.{}", self.path),
            None => self.path.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    /// CQL wildcard match: `*` any run, `?` one character.
    #[serde(rename = "matches")]
    Matches,
}

/// Caller-supplied literal. Always bound as a parameter, never spliced into SQL text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every record (`cql.allRecords=1`).
    All,
    Compare {
        field: FieldRef,
        op: CompareOp,
        value: Literal,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: FieldRef, op: CompareOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    /// Every field reference in traversal order.
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            Predicate::All => {}
            Predicate::Compare { field, .. } => out.push(field),
            Predicate::And(children) | Predicate::Or(children) => {
                for c in children {
                    c.collect_fields(out);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(out),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Integer(n)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: FieldRef,
    #[serde(default)]
    pub descending: bool,
}

/// Ad-hoc search: predicate plus paging and ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub predicate: Predicate,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

impl SearchRequest {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }
}
