use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use crate::{
    station::{stats::StatsQuery, Field, StationId, StationRecord, TownFilter},
    store::{self, DataAccess},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowColor {
    Active,
    Inactive,
}

impl RowColor {
    fn of(record: &StationRecord) -> Self {
        if record.active {
            RowColor::Active
        } else {
            RowColor::Inactive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub key: String,
    pub color: RowColor,
}

/// Which bulk-action controls are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BulkActions {
    pub edit: bool,
    pub delete: bool,
    pub activate: bool,
    pub deactivate: bool,
}

impl BulkActions {
    fn for_selection(count: usize) -> Self {
        let any = count > 0;
        Self {
            edit: count == 1,
            delete: any,
            activate: any,
            deactivate: any,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    TownAndName { town: TownFilter, name: String },
    /// `(lat, lon)` vertices.
    Polygon(Vec<(f64, f64)>),
    Stats(StatsQuery),
}

impl Query {
    fn run(&self, store: &dyn DataAccess) -> store::Result<Vec<StationRecord>> {
        match self {
            Query::TownAndName { town, name } => store.search(town, name),
            Query::Polygon(points) => store.search_by_polygon(points),
            Query::Stats(query) => store.search_by_stats(query),
        }
    }
}

/// Records matching the last query, their list rows, and the widget
/// selection.
///
/// The selection holds display keys, as the list widget reports them. A key
/// shared by several records selects all of them for bulk actions, and the
/// first of them for editing.
#[derive(Debug, Default)]
pub struct ResultList {
    records: Vec<StationRecord>,
    rows: Vec<Row>,
    sort: Option<Field>,
    selection: Vec<String>,
    actions: BulkActions,
}

impl ResultList {
    pub fn records(&self) -> &[StationRecord] {
        &self.records
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn sort_field(&self) -> Option<Field> {
        self.sort
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn actions(&self) -> BulkActions {
        self.actions
    }

    /// Replaces the whole result set. On failure the previous results stay.
    pub fn run_query(&mut self, store: &dyn DataAccess, query: &Query) -> store::Result<()> {
        let records = query.run(store)?;
        debug!("query returned {} stations", records.len());

        self.records = records;
        self.sort = None;
        self.render_rows();
        self.set_selection(vec![]);
        Ok(())
    }

    pub fn sort_by(&mut self, field: Option<Field>) {
        let Some(field) = field else {
            return;
        };
        if self.records.is_empty() {
            return;
        }

        // slice::sort_by is stable
        self.records.sort_by(|a, b| field.compare(a, b));
        self.sort = Some(field);
        self.render_rows();
    }

    /// Selects the rows carrying these keys. Unknown keys are dropped.
    pub fn select(&mut self, keys: &[String]) {
        let keys = keys
            .iter()
            .filter(|k| self.rows.iter().any(|r| &r.key == *k))
            .unique()
            .cloned()
            .collect();
        self.set_selection(keys);
    }

    pub fn select_all(&mut self) {
        let keys = self.rows.iter().map(|r| r.key.clone()).unique().collect();
        self.set_selection(keys);
    }

    pub fn select_none(&mut self) {
        self.set_selection(vec![]);
    }

    /// Sets the active flag of every selected station with one store call,
    /// then mirrors it locally. Returns the recolored row indices.
    pub fn bulk_activate(
        &mut self,
        store: &mut dyn DataAccess,
        state: bool,
    ) -> store::Result<Vec<usize>> {
        let indices = self.selected_indices();
        if indices.is_empty() {
            return Ok(vec![]);
        }

        let ids = self.ids_at(&indices);
        store.set_active(&ids, state)?;

        for &i in &indices {
            self.records[i].active = state;
            self.rows[i].color = RowColor::of(&self.records[i]);
        }
        Ok(indices)
    }

    /// Deletes every selected station with one store call and drops them
    /// from the list. Returns how many records were removed.
    pub fn bulk_delete(&mut self, store: &mut dyn DataAccess) -> store::Result<usize> {
        let indices = self.selected_indices();
        if indices.is_empty() {
            return Ok(0);
        }

        let ids = self.ids_at(&indices);
        store.delete(&ids)?;

        // highest first so the remaining indices stay valid
        for &i in indices.iter().rev() {
            self.records.remove(i);
        }
        self.render_rows();
        self.set_selection(vec![]);
        Ok(indices.len())
    }

    /// Index of the record to edit: the first one matching the single
    /// selected key.
    pub fn editor_target(&self) -> Option<usize> {
        match self.selection.as_slice() {
            [key] => self.records.iter().position(|r| &r.display_key() == key),
            _ => None,
        }
    }

    /// Merges an edited record back at `index`. Returns `false` when the
    /// slot no longer holds that station.
    pub fn replace(&mut self, index: usize, record: StationRecord) -> bool {
        match self.records.get_mut(index) {
            Some(current) if current.id == record.id => {
                *current = record;
                self.render_rows();
                self.set_selection(vec![]);
                true
            }
            _ => false,
        }
    }

    fn selected_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .positions(|r| self.selection.contains(&r.display_key()))
            .collect()
    }

    fn ids_at(&self, indices: &[usize]) -> Vec<StationId> {
        indices.iter().map(|&i| self.records[i].id.clone()).collect()
    }

    fn set_selection(&mut self, keys: Vec<String>) {
        self.actions = BulkActions::for_selection(keys.len());
        self.selection = keys;
    }

    fn render_rows(&mut self) {
        self.rows = self
            .records
            .iter()
            .map(|r| Row {
                key: r.display_key(),
                color: RowColor::of(r),
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        station::station,
        store::testing::{Call, RecordingStore},
    };

    fn all() -> Query {
        Query::TownAndName {
            town: TownFilter::All,
            name: String::new(),
        }
    }

    fn keys(list: &ResultList) -> Vec<&str> {
        list.rows().iter().map(|r| r.key.as_str()).collect()
    }

    fn loaded(live: Vec<StationRecord>) -> (ResultList, RecordingStore, crate::store::testing::Probe) {
        let (store, probe) = RecordingStore::new(live);
        let mut list = ResultList::default();
        list.run_query(&store, &all()).unwrap();
        (list, store, probe)
    }

    #[test]
    fn test_run_query_colors_rows_and_resets_sort() {
        let (mut list, store, _) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", false),
        ]);
        list.sort_by(Some(Field::Active));
        assert_eq!(list.sort_field(), Some(Field::Active));

        list.run_query(&store, &all()).unwrap();
        assert_eq!(list.sort_field(), None);
        assert_eq!(list.count(), 2);
        assert_eq!(
            list.rows(),
            &[
                Row {
                    key: "Lyon ; A".into(),
                    color: RowColor::Active
                },
                Row {
                    key: "Lyon ; B".into(),
                    color: RowColor::Inactive
                },
            ]
        );
    }

    #[test]
    fn test_failed_query_keeps_results() {
        let (mut list, store, probe) = loaded(vec![station("1", "Lyon", "A", true)]);
        list.select_all();
        probe.fail_with("offline");

        assert!(list.run_query(&store, &all()).is_err());
        assert_eq!(keys(&list), vec!["Lyon ; A"]);
        assert_eq!(list.selection(), &["Lyon ; A".to_owned()]);
    }

    #[test]
    fn test_sort_by_name_keeps_colors() {
        let (mut list, _, _) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", false),
        ]);
        list.sort_by(Some(Field::Name));

        assert_eq!(keys(&list), vec!["Lyon ; A", "Lyon ; B"]);
        assert_eq!(list.rows()[0].color, RowColor::Active);
        assert_eq!(list.rows()[1].color, RowColor::Inactive);
    }

    #[test]
    fn test_sort_is_stable_and_idempotent() {
        let mut counts = vec![];
        for (id, bikes) in [("1", 5), ("2", 3), ("3", 5), ("4", 3), ("5", 1)] {
            let mut s = station(id, "Lyon", id, true);
            s.bikes_available = bikes;
            counts.push(s);
        }
        let (mut list, _, _) = loaded(counts);

        list.sort_by(Some(Field::BikesAvailable));
        let once = keys(&list).join(",");
        assert_eq!(once, "Lyon ; 5,Lyon ; 2,Lyon ; 4,Lyon ; 1,Lyon ; 3");

        list.sort_by(Some(Field::BikesAvailable));
        assert_eq!(keys(&list).join(","), once);
    }

    #[test]
    fn test_sort_without_field_or_results_is_noop() {
        let (mut list, _, _) = loaded(vec![
            station("2", "Lyon", "B", true),
            station("1", "Lille", "A", true),
        ]);
        let before = keys(&list).join(",");
        list.sort_by(None);
        assert_eq!(keys(&list).join(","), before);
        assert_eq!(list.sort_field(), None);

        let mut empty = ResultList::default();
        empty.sort_by(Some(Field::Name));
        assert_eq!(empty.sort_field(), None);
    }

    #[test]
    fn test_action_enablement() {
        let (mut list, _, _) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", false),
        ]);
        assert_eq!(list.actions(), BulkActions::default());

        list.select(&["Lyon ; A".to_owned()]);
        assert_eq!(
            list.actions(),
            BulkActions {
                edit: true,
                delete: true,
                activate: true,
                deactivate: true
            }
        );

        list.select_all();
        assert!(!list.actions().edit);
        assert!(list.actions().delete && list.actions().activate && list.actions().deactivate);

        list.select_none();
        assert_eq!(list.actions(), BulkActions::default());
    }

    #[test]
    fn test_select_drops_unknown_keys() {
        let (mut list, _, _) = loaded(vec![station("1", "Lyon", "A", true)]);
        list.select(&["Lyon ; A".to_owned(), "Lyon ; Z".to_owned(), "Lyon ; A".to_owned()]);
        assert_eq!(list.selection(), &["Lyon ; A".to_owned()]);
        assert!(list.actions().edit);
    }

    #[test]
    fn test_bulk_activate_single_inactive() {
        let (mut list, mut store, probe) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", false),
            station("3", "Lyon", "C", false),
        ]);
        list.select(&["Lyon ; B".to_owned()]);

        let recolored = list.bulk_activate(&mut store, true).unwrap();
        assert_eq!(recolored, vec![1]);
        assert!(list.records()[1].active);
        assert_eq!(list.rows()[1].color, RowColor::Active);
        assert_eq!(list.rows()[2].color, RowColor::Inactive);
        assert_eq!(
            probe.calls(),
            vec![Call::SetActive(vec![StationId::new("2")], true)]
        );
    }

    #[test]
    fn test_bulk_activate_failure_changes_nothing() {
        let (mut list, mut store, probe) = loaded(vec![station("1", "Lyon", "A", false)]);
        list.select_all();
        probe.fail_with("offline");

        assert!(list.bulk_activate(&mut store, true).is_err());
        assert!(!list.records()[0].active);
        assert_eq!(list.rows()[0].color, RowColor::Inactive);
    }

    #[test]
    fn test_bulk_delete_removes_exactly_the_selection() {
        let (mut list, mut store, probe) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", true),
            station("3", "Lyon", "C", true),
            station("4", "Lyon", "D", true),
        ]);
        list.select(&["Lyon ; D".to_owned(), "Lyon ; B".to_owned()]);

        assert_eq!(list.bulk_delete(&mut store).unwrap(), 2);
        assert_eq!(keys(&list), vec!["Lyon ; A", "Lyon ; C"]);
        assert_eq!(
            probe.calls(),
            vec![Call::Delete(vec![StationId::new("2"), StationId::new("4")])]
        );
        assert!(list.selection().is_empty());
        assert_eq!(list.actions(), BulkActions::default());
    }

    #[test]
    fn test_bulk_actions_without_selection_skip_the_store() {
        let (mut list, mut store, probe) = loaded(vec![station("1", "Lyon", "A", true)]);
        assert_eq!(list.bulk_delete(&mut store).unwrap(), 0);
        assert!(list.bulk_activate(&mut store, false).unwrap().is_empty());
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_editor_target_uses_first_duplicate() {
        let (mut list, _, _) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "A", false),
        ]);
        list.select(&["Lyon ; A".to_owned()]);
        assert_eq!(list.editor_target(), Some(0));

        list.select_none();
        assert_eq!(list.editor_target(), None);
    }

    #[test]
    fn test_replace_checks_identity() {
        let (mut list, _, _) = loaded(vec![
            station("1", "Lyon", "A", true),
            station("2", "Lyon", "B", true),
        ]);
        let mut renamed = list.records()[1].clone();
        renamed.name = "Z".into();

        assert!(!list.replace(0, renamed.clone()));
        assert!(list.replace(1, renamed));
        assert_eq!(keys(&list), vec!["Lyon ; A", "Lyon ; Z"]);
    }
}
