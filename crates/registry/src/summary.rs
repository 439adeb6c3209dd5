//! Tabular summary rendering for human-facing listings.
//!
//! Pure and side-effect free; not involved in persistence semantics.

use chrono::Utc;
use palisade_core::ResourceObject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub label: &'static str,
}

pub fn col(label: &'static str) -> ColumnSpec {
    ColumnSpec { label }
}

/// Fixed column set plus one row of rendered cells per object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<String>>,
}

/// Per-kind summary renderer. Kinds with no opinionated columns fall back
/// to `MetaTabulator`.
pub trait Tabulator<K>: Send + Sync {
    fn columns(&self) -> Vec<ColumnSpec>;
    fn row(&self, obj: &K) -> Vec<String>;
}

pub fn render<K>(tabulator: &dyn Tabulator<K>, objs: &[K]) -> Table {
    Table {
        columns: tabulator.columns(),
        rows: objs.iter().map(|o| tabulator.row(o)).collect(),
    }
}

/// Coarse age rendering: 42s, 7m, 3h, 12d.
pub fn age_of<K: ResourceObject>(obj: &K) -> String {
    let Some(created) = obj.metadata().creation_timestamp else {
        return "-".to_string();
    };
    let secs = (Utc::now() - created).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Fallback renderer: Namespace (when applicable), Name, Age.
pub struct MetaTabulator;

impl<K: ResourceObject> Tabulator<K> for MetaTabulator {
    fn columns(&self) -> Vec<ColumnSpec> {
        if K::NAMESPACED {
            vec![col("Namespace"), col("Name"), col("Age")]
        } else {
            vec![col("Name"), col("Age")]
        }
    }

    fn row(&self, obj: &K) -> Vec<String> {
        let meta = obj.metadata();
        let mut cells = Vec::with_capacity(3);
        if K::NAMESPACED {
            cells.push(meta.namespace.clone().unwrap_or_else(|| "-".to_string()));
        }
        cells.push(meta.name.clone());
        cells.push(age_of(obj));
        cells
    }
}
