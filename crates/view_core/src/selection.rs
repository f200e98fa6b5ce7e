//! Multi-select over the rows a view has loaded.

use std::collections::HashSet;

use shared::domain::{AssetUid, ProjectRow};
use tracing::debug;

use crate::store::ViewSnapshot;

/// Action surface derived from the current selection.
#[derive(Debug, PartialEq)]
pub enum SelectionAffordance<'a> {
    None,
    Single(&'a ProjectRow),
    Bulk(Vec<&'a ProjectRow>),
}

/// Owns the selected uids. Row data is never copied: every derivation reads
/// the snapshot it is handed.
#[derive(Debug, Default)]
pub struct SelectionController {
    selected: HashSet<AssetUid>,
    generation: Option<u64>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole selection. Uids not loaded in `snapshot` are ignored.
    pub fn set_selection<I>(&mut self, snapshot: &ViewSnapshot, uids: I)
    where
        I: IntoIterator<Item = AssetUid>,
    {
        self.generation = Some(snapshot.generation);
        self.selected = uids
            .into_iter()
            .filter(|uid| snapshot.row(uid).is_some())
            .collect();
    }

    /// Drops the selection when the view was reset and prunes uids whose rows
    /// left the view.
    pub fn sync(&mut self, snapshot: &ViewSnapshot) {
        if self.generation != Some(snapshot.generation) {
            if !self.selected.is_empty() {
                debug!(
                    "selection: cleared on reset generation={}",
                    snapshot.generation
                );
            }
            self.selected.clear();
            self.generation = Some(snapshot.generation);
            return;
        }
        self.selected.retain(|uid| snapshot.row(uid).is_some());
    }

    /// Selected rows in view order.
    pub fn selected_rows<'a>(&mut self, snapshot: &'a ViewSnapshot) -> Vec<&'a ProjectRow> {
        self.sync(snapshot);
        snapshot
            .rows
            .iter()
            .filter(|row| self.selected.contains(&row.uid))
            .collect()
    }

    pub fn affordance<'a>(&mut self, snapshot: &'a ViewSnapshot) -> SelectionAffordance<'a> {
        let mut rows = self.selected_rows(snapshot);
        match rows.len() {
            0 => SelectionAffordance::None,
            1 => SelectionAffordance::Single(rows.remove(0)),
            _ => SelectionAffordance::Bulk(rows),
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, uid: &AssetUid) -> bool {
        self.selected.contains(uid)
    }

    /// Raw count; may include uids pruned at the next derivation.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
