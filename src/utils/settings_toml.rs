//! `.invstream.toml`: `[settings]` onto `Opts`, `[views]` into a `ViewCatalog`. The CLI loads it
//! from the working directory; library callers may build both themselves.
//!
//! ```toml
//! [settings]
//! db_path = "inventory.db"
//! batch_size = 500
//! event_high_water = 2000
//!
//! [views]
//! id_column = "id"
//! qualifiers = { holdingsRecords = "JOINED_L1", item = "JOINED_L2" }
//!
//! [[views.view]]
//! level = "BASE"
//! name = "instance"
//! aliases = { BASE = "jsonb" }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::catalog::{ViewCatalog, ViewDescriptor};
use crate::sink::Watermarks;
use crate::utils::config::PackagePaths;
use crate::{Opts, ScopeLevel};

#[derive(Debug, Default, Deserialize)]
pub struct SettingsToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default)]
    views: Option<ViewsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    batch_size: Option<usize>,
    http_high_water: Option<usize>,
    http_low_water: Option<usize>,
    event_high_water: Option<usize>,
    event_low_water: Option<usize>,
    progress_every: Option<u64>,
    events_path: Option<String>,
    verbose: Option<bool>,
    encrypt: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ViewsSection {
    id_column: Option<String>,
    qualifiers: Option<HashMap<String, String>>,
    #[serde(default)]
    view: Vec<ViewEntry>,
}

#[derive(Debug, Deserialize)]
struct ViewEntry {
    level: String,
    name: String,
    aliases: HashMap<String, String>,
}

impl SettingsToml {
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse settings")
    }
}

/// Load `.invstream.toml` from `dir` if present. Returns None if file missing or unparsable.
pub fn load_settings_toml(dir: &Path) -> Option<SettingsToml> {
    let path = dir.join(PackagePaths::get().settings_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    SettingsToml::parse(&s)
        .map_err(|e| log::warn!("{}: {:#}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub fn apply_file_to_opts(file: &SettingsToml, opts: &mut Opts) {
    let sec = &file.settings;
    if let Some(ref p) = sec.db_path {
        opts.db_path = Some(PathBuf::from(p));
    }
    apply_file_opt!(sec, opts, batch_size => batch_size);
    apply_file_opt!(sec, opts, progress_every => progress_every);
    apply_file_opt!(sec, opts, verbose => verbose);
    apply_file_opt!(sec, opts, encrypt => encrypt);
    if let Some(ref p) = sec.events_path {
        opts.events_path = Some(PathBuf::from(p));
    }
    opts.http_watermarks = Watermarks::new(
        sec.http_high_water.unwrap_or(opts.http_watermarks.high),
        sec.http_low_water.unwrap_or(opts.http_watermarks.low),
    );
    opts.event_watermarks = Watermarks::new(
        sec.event_high_water.unwrap_or(opts.event_watermarks.high),
        sec.event_low_water.unwrap_or(opts.event_watermarks.low),
    );
}

/// View catalog from the `[views]` section, falling back to the inventory defaults for
/// anything the file leaves out. Validated before it is returned.
pub fn catalog_from_file(file: Option<&SettingsToml>) -> Result<ViewCatalog> {
    let defaults = ViewCatalog::inventory();
    let Some(views) = file.and_then(|f| f.views.as_ref()) else {
        return Ok(defaults);
    };

    let descriptors = if views.view.is_empty() {
        defaults.views().to_vec()
    } else {
        views
            .view
            .iter()
            .map(view_descriptor)
            .collect::<Result<Vec<_>>>()?
    };
    let qualifiers = match &views.qualifiers {
        Some(map) => map
            .iter()
            .map(|(q, level)| {
                let level: ScopeLevel = level
                    .parse()
                    .with_context(|| format!("qualifier '{q}'"))?;
                Ok((q.clone(), level))
            })
            .collect::<Result<BTreeMap<_, _>>>()?,
        None => defaults.qualifiers().clone(),
    };
    let id_column = views
        .id_column
        .as_deref()
        .unwrap_or(defaults.id_column());

    ViewCatalog::new(descriptors, id_column, qualifiers).context("invalid [views] configuration")
}

fn view_descriptor(entry: &ViewEntry) -> Result<ViewDescriptor> {
    let scope_level: ScopeLevel = entry
        .level
        .parse()
        .with_context(|| format!("view '{}'", entry.name))?;
    let column_alias_by_scope = entry
        .aliases
        .iter()
        .map(|(level, alias)| {
            let level: ScopeLevel = level
                .parse()
                .with_context(|| format!("alias of view '{}'", entry.name))?;
            Ok((level, alias.clone()))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    Ok(ViewDescriptor {
        scope_level,
        view_name: entry.name.clone(),
        column_alias_by_scope,
    })
}
