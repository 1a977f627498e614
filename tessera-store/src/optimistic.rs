use crate::{Record, RecordSource, RecordSourceMap, RecordState};
use fnv::{FnvHashMap, FnvHashSet};
use std::{collections::BTreeMap, fmt, ops::Bound, sync::Arc};
use tessera::DataId;

/// Computes the records of an optimistic layer from the records beneath it.
pub type LayerFn = Arc<dyn Fn(&dyn RecordSource) -> RecordSourceMap + Send + Sync>;

struct Layer {
    key: u64,
    update: LayerFn,
    sink: RecordSourceMap
}

/// The stack of optimistic layers above the base records.
///
/// Layers are stored in insertion order. Each one keeps the function that produced it, so
/// when anything beneath it changes it is recomputed against the new data instead of
/// shadowing it with stale records.
#[derive(Default)]
pub struct OptimisticLayers {
    layers: BTreeMap<u64, Layer>,
    positions: FnvHashMap<u64, u64>,
    next_position: u64
}

impl fmt::Debug for OptimisticLayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.values().map(|layer| layer.key))
            .finish()
    }
}

impl OptimisticLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.positions.contains_key(&key)
    }

    /// Add a layer on top. Returns the ids it touches.
    pub fn push(&mut self, base: &RecordSourceMap, key: u64, update: LayerFn) -> Vec<DataId> {
        let sink = {
            let view = self.view_below(base, Bound::Unbounded);
            update(&view)
        };
        let changed = sink.record_ids();
        let position = self.next_position;
        self.next_position += 1;
        if let Some(previous) = self.positions.insert(key, position) {
            self.layers.remove(&previous);
        }
        self.layers.insert(position, Layer { key, update, sink });
        changed
    }

    /// Remove a layer and recompute the layers above it. Returns every id touched by the
    /// removed layer or by the recomputed ones, or `None` if there was no such layer.
    pub fn remove(&mut self, base: &RecordSourceMap, key: u64) -> Option<Vec<DataId>> {
        let position = self.positions.remove(&key)?;
        let layer = self.layers.remove(&position)?;
        let mut changed: FnvHashSet<DataId> = layer.sink.record_ids().into_iter().collect();
        changed.extend(self.rebase_from(base, position));
        Some(changed.into_iter().collect())
    }

    /// Recompute every layer after the base changed.
    pub fn rebase(&mut self, base: &RecordSourceMap) -> Vec<DataId> {
        self.rebase_from(base, 0).into_iter().collect()
    }

    fn rebase_from(&mut self, base: &RecordSourceMap, from: u64) -> FnvHashSet<DataId> {
        let mut changed = FnvHashSet::default();
        let positions: Vec<u64> = self.layers.range(from..).map(|(key, _)| *key).collect();
        for position in positions {
            let sink = {
                let view = self.view_below(base, Bound::Excluded(position));
                match self.layers.get(&position) {
                    Some(layer) => (layer.update)(&view),
                    None => continue
                }
            };
            if let Some(layer) = self.layers.get_mut(&position) {
                if layer.sink != sink {
                    changed.extend(layer.sink.record_ids());
                    changed.extend(sink.record_ids());
                }
                layer.sink = sink;
            }
        }
        changed
    }

    fn view_below<'a>(&'a self, base: &'a RecordSourceMap, below: Bound<u64>) -> StoreView<'a> {
        let layers = self
            .layers
            .range((Bound::Unbounded, below))
            .rev()
            .map(|(_, layer)| &layer.sink)
            .collect();
        StoreView { base, layers }
    }

    /// The merged view of the base and every layer.
    pub fn view<'a>(&'a self, base: &'a RecordSourceMap) -> StoreView<'a> {
        self.view_below(base, Bound::Unbounded)
    }

    pub fn clear(&mut self) {
        self.layers.clear();
        self.positions.clear();
    }
}

/// A read view over the base records and the optimistic layers above them. Lookups fall
/// through from the topmost layer to the base; a tombstone in a layer hides the records
/// beneath it.
pub struct StoreView<'a> {
    base: &'a RecordSourceMap,
    // Topmost first.
    layers: Vec<&'a RecordSourceMap>
}

impl<'a> StoreView<'a> {
    pub fn base(base: &'a RecordSourceMap) -> Self {
        StoreView {
            base,
            layers: Vec::new()
        }
    }

    fn entry(&self, id: &str) -> Option<&'a Option<Arc<Record>>> {
        self.layers
            .iter()
            .copied()
            .find_map(|layer| layer.entry(id))
            .or_else(|| self.base.entry(id))
    }

    /// Flatten the view into a single source.
    pub fn to_source(&self) -> RecordSourceMap {
        let mut source = RecordSourceMap::new();
        for id in self.record_ids() {
            match self.entry(&id) {
                Some(Some(record)) => source.set_arc(record.clone()),
                Some(None) => source.delete(&id),
                None => {}
            }
        }
        source
    }
}

impl<'a> RecordSource for StoreView<'a> {
    fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.entry(id).and_then(Option::as_ref)
    }

    fn status(&self, id: &str) -> RecordState {
        match self.entry(id) {
            Some(Some(_)) => RecordState::Existent,
            Some(None) => RecordState::Nonexistent,
            None => RecordState::Unknown
        }
    }

    fn size(&self) -> usize {
        self.record_ids().len()
    }

    fn record_ids(&self) -> Vec<DataId> {
        let mut ids: FnvHashSet<DataId> = self.base.record_ids().into_iter().collect();
        for layer in &self.layers {
            ids.extend(layer.record_ids());
        }
        ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rename(id: &'static str, name: &'static str) -> LayerFn {
        Arc::new(move |source: &dyn RecordSource| {
            let mut sink = RecordSourceMap::new();
            if let Some(record) = source.get(id) {
                let mut record = Record::clone(record);
                record.set_value("name", json!(name));
                sink.set(record);
            }
            sink
        })
    }

    fn base() -> RecordSourceMap {
        let mut base = RecordSourceMap::new();
        let mut record = Record::new("User:1", "User");
        record.set_value("name", json!("Alice"));
        record.set_value("age", json!(30));
        base.set(record);
        base
    }

    fn name(view: &StoreView, id: &str) -> Option<serde_json::Value> {
        view.get(id).and_then(|record| record.get_value("name").cloned())
    }

    #[test]
    fn layers_shadow_the_base() {
        let base = base();
        let mut layers = OptimisticLayers::new();
        let changed = layers.push(&base, 1, rename("User:1", "Zuck"));
        assert_eq!(changed, vec!["User:1".to_string()]);

        let view = layers.view(&base);
        assert_eq!(name(&view, "User:1"), Some(json!("Zuck")));
        assert_eq!(
            view.get("User:1").and_then(|r| r.get_value("age").cloned()),
            Some(json!(30))
        );
    }

    #[test]
    fn removing_a_layer_rebases_the_ones_above() {
        let base = base();
        let mut layers = OptimisticLayers::new();
        layers.push(&base, 1, rename("User:1", "Zuck"));
        let appender: LayerFn = Arc::new(|source: &dyn RecordSource| {
            let mut sink = RecordSourceMap::new();
            if let Some(record) = source.get("User:1") {
                let mut record = Record::clone(record);
                let name = record
                    .get_value("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or_default()
                    .to_string();
                record.set_value("name", json!(format!("{}!", name)));
                sink.set(record);
            }
            sink
        });
        layers.push(&base, 2, appender);
        assert_eq!(name(&layers.view(&base), "User:1"), Some(json!("Zuck!")));

        let changed = layers.remove(&base, 1).unwrap();
        assert_eq!(changed, vec!["User:1".to_string()]);
        assert_eq!(name(&layers.view(&base), "User:1"), Some(json!("Alice!")));
        assert!(layers.remove(&base, 1).is_none());
    }

    #[test]
    fn tombstones_in_layers_hide_base_records() {
        let base = base();
        let mut layers = OptimisticLayers::new();
        layers.push(
            &base,
            7,
            Arc::new(|_: &dyn RecordSource| {
                let mut sink = RecordSourceMap::new();
                sink.delete("User:1");
                sink
            })
        );

        let view = layers.view(&base);
        assert_eq!(view.status("User:1"), RecordState::Nonexistent);
        assert!(view.get("User:1").is_none());

        layers.remove(&base, 7);
        assert_eq!(layers.view(&base).status("User:1"), RecordState::Existent);
        assert!(layers.is_empty());
    }

    #[test]
    fn removed_layers_free_their_slots() {
        let base = base();
        let mut layers = OptimisticLayers::new();
        layers.push(&base, 1, rename("User:1", "Zuck"));
        for key in 2..1000 {
            layers.push(&base, key, rename("User:1", "Mark"));
            layers.remove(&base, key);
        }
        assert_eq!(layers.len(), 1);
        assert_eq!(layers.layers.len(), 1);
        assert_eq!(layers.positions.len(), 1);
        assert_eq!(name(&layers.view(&base), "User:1"), Some(json!("Zuck")));
    }
}
