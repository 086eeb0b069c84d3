//! View catalog: which pre-joined view serves each scope level, and which column alias each view
//! gives every entity it carries. Immutable once built.

use std::collections::BTreeMap;

use crate::ScopeLevel;
use crate::error::CatalogError;

/// One pre-joined view. `column_alias_by_scope` has an entry for every level up to `scope_level`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewDescriptor {
    pub scope_level: ScopeLevel,
    pub view_name: String,
    pub column_alias_by_scope: BTreeMap<ScopeLevel, String>,
}

impl ViewDescriptor {
    pub fn new(scope_level: ScopeLevel, view_name: &str, aliases: &[(ScopeLevel, &str)]) -> Self {
        Self {
            scope_level,
            view_name: view_name.to_string(),
            column_alias_by_scope: aliases
                .iter()
                .map(|(level, alias)| (*level, alias.to_string()))
                .collect(),
        }
    }

    /// Column holding the document of the entity at `level`.
    pub fn alias(&self, level: ScopeLevel) -> Option<&str> {
        self.column_alias_by_scope.get(&level).map(String::as_str)
    }

    /// `<view>.<alias>` for an entity at `level`.
    pub fn qualified_column(&self, level: ScopeLevel) -> Option<String> {
        self.alias(level)
            .map(|alias| format!("{}.{}", self.view_name, alias))
    }
}

/// Static metadata: one view per scope level plus the relationship qualifiers that select them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewCatalog {
    // Indexed by `ScopeLevel as usize`; construction guarantees one entry per level.
    views: [ViewDescriptor; 3],
    id_column: String,
    qualifiers: BTreeMap<String, ScopeLevel>,
}

pub const INSTANCE_TABLE: &str = "instance";
pub const INSTANCE_HOLDINGS_VIEW: &str = "instance_holding_view";
pub const INSTANCE_HOLDINGS_ITEMS_VIEW: &str = "instance_holding_item_view";

impl ViewCatalog {
    /// Catalog for the bundled inventory schema: instance → holdings → items.
    pub fn inventory() -> Self {
        let views = [
            ViewDescriptor::new(ScopeLevel::Base, INSTANCE_TABLE, &[(ScopeLevel::Base, "jsonb")]),
            ViewDescriptor::new(
                ScopeLevel::JoinedL1,
                INSTANCE_HOLDINGS_VIEW,
                &[(ScopeLevel::Base, "jsonb"), (ScopeLevel::JoinedL1, "ho_jsonb")],
            ),
            ViewDescriptor::new(
                ScopeLevel::JoinedL2,
                INSTANCE_HOLDINGS_ITEMS_VIEW,
                &[
                    (ScopeLevel::Base, "jsonb"),
                    (ScopeLevel::JoinedL1, "ho_jsonb"),
                    (ScopeLevel::JoinedL2, "it_jsonb"),
                ],
            ),
        ];
        let qualifiers = [
            ("holdingsRecords", ScopeLevel::JoinedL1),
            ("holdingsRecords.items", ScopeLevel::JoinedL2),
            ("item", ScopeLevel::JoinedL2),
        ]
        .into_iter()
        .map(|(q, l)| (q.to_string(), l))
        .collect();
        Self {
            views,
            id_column: "id".to_string(),
            qualifiers,
        }
    }

    /// Build a catalog from configuration. Every level needs exactly one view, every view needs an
    /// alias for each level it covers, and every name must be a plain SQL identifier.
    pub fn new(
        views: Vec<ViewDescriptor>,
        id_column: &str,
        qualifiers: BTreeMap<String, ScopeLevel>,
    ) -> Result<Self, CatalogError> {
        check_identifier(id_column)?;
        let mut slots: [Option<ViewDescriptor>; 3] = [None, None, None];
        for view in views {
            check_identifier(&view.view_name)?;
            for alias in view.column_alias_by_scope.values() {
                check_identifier(alias)?;
            }
            for level in ScopeLevel::ALL
                .into_iter()
                .filter(|l| *l <= view.scope_level)
            {
                if view.alias(level).is_none() {
                    return Err(CatalogError::MissingAlias {
                        view: view.view_name.clone(),
                        level,
                    });
                }
            }
            let slot = &mut slots[view.scope_level as usize];
            if slot.is_some() {
                return Err(CatalogError::DuplicateView(view.scope_level));
            }
            *slot = Some(view);
        }
        for (qualifier, level) in &qualifiers {
            if *level == ScopeLevel::Base {
                return Err(CatalogError::BaseQualifier {
                    qualifier: qualifier.clone(),
                });
            }
        }
        let [base, l1, l2] = slots;
        let views = [
            base.ok_or(CatalogError::MissingView(ScopeLevel::Base))?,
            l1.ok_or(CatalogError::MissingView(ScopeLevel::JoinedL1))?,
            l2.ok_or(CatalogError::MissingView(ScopeLevel::JoinedL2))?,
        ];
        Ok(Self {
            views,
            id_column: id_column.to_string(),
            qualifiers,
        })
    }

    pub fn view(&self, level: ScopeLevel) -> &ViewDescriptor {
        &self.views[level as usize]
    }

    pub fn views(&self) -> &[ViewDescriptor] {
        &self.views
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn qualifiers(&self) -> &BTreeMap<String, ScopeLevel> {
        &self.qualifiers
    }

    /// Scope level a qualifier implies. Unqualified is `Base`; an unknown qualifier is `None`.
    pub fn scope_of(&self, qualifier: Option<&str>) -> Option<ScopeLevel> {
        match qualifier {
            None => Some(ScopeLevel::Base),
            Some(q) => self.qualifiers.get(q).copied(),
        }
    }
}

impl Default for ViewCatalog {
    fn default() -> Self {
        Self::inventory()
    }
}

fn check_identifier(name: &str) -> Result<(), CatalogError> {
    let mut chars = name.chars();
    let ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier(name.to_string()))
    }
}
