use crate::{
    generate_client_id, read, Data, Record, RecordSource, RecordSourceMap, RecordState,
    RecordValue, SingularReaderSelector, Snapshot, StoreError, ROOT_ID, ROOT_TYPE
};
use fnv::FnvHashSet;
use serde_json::Value;
use std::{cell::RefCell, fmt, sync::Arc};
use tessera::{utils::format_storage_key, DataId, Variables};

/// Mutates the store through proxies. Used for optimistic updates and `commit_update`.
pub type StoreUpdater = Arc<dyn Fn(&RecordSourceProxy<'_>) + Send + Sync>;

/// Like [`StoreUpdater`](./type.StoreUpdater.html), but also receives the data of the
/// payload it runs after, read with the operation's root fragment.
pub type SelectorStoreUpdater = Arc<dyn Fn(&RecordSourceProxy<'_>, &Data) + Send + Sync>;

/// Copy-on-write writes over a read-only source.
///
/// Reads see the written records first, then `base`. The first write to a base record copies
/// it into the sink; records already in the sink are only cloned if something else still
/// shares them.
pub struct RecordSourceMutator<'a> {
    base: &'a dyn RecordSource,
    sink: RecordSourceMap
}

impl<'a> RecordSourceMutator<'a> {
    pub fn new(base: &'a dyn RecordSource) -> Self {
        Self::with_sink(base, RecordSourceMap::new())
    }

    /// Start from records that were already written, e.g. a normalized payload.
    pub fn with_sink(base: &'a dyn RecordSource, sink: RecordSourceMap) -> Self {
        RecordSourceMutator { base, sink }
    }

    pub fn create(&mut self, id: &str, typename: &str) {
        self.sink.set(Record::new(id, typename));
    }

    pub fn delete(&mut self, id: &str) {
        self.sink.delete(id);
    }

    /// A writable copy of the record, `None` if it doesn't exist.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        if self.sink.entry(id).is_none() {
            let record = self.base.get(id)?.clone();
            self.sink.set_arc(record);
        }
        self.sink.entry_mut(id)?.as_mut().map(Arc::make_mut)
    }

    /// Add every record of `source` to the sink, merging with what is there.
    pub fn publish_source(&mut self, source: &RecordSourceMap) {
        for (id, entry) in source.entries() {
            match entry {
                None => self.sink.delete(id),
                Some(record) => match self.get_mut(id) {
                    Some(existing) => {
                        if let Some(merged) = Record::update(existing, record) {
                            *existing = merged;
                        }
                    }
                    None => self.sink.set_arc(record.clone())
                }
            }
        }
    }

    pub fn sink(&self) -> &RecordSourceMap {
        &self.sink
    }

    pub fn into_sink(self) -> RecordSourceMap {
        self.sink
    }
}

impl<'a> RecordSource for RecordSourceMutator<'a> {
    fn get(&self, id: &str) -> Option<&Arc<Record>> {
        match self.sink.entry(id) {
            Some(entry) => entry.as_ref(),
            None => self.base.get(id)
        }
    }

    fn status(&self, id: &str) -> RecordState {
        match self.sink.entry(id) {
            Some(Some(_)) => RecordState::Existent,
            Some(None) => RecordState::Nonexistent,
            None => self.base.status(id)
        }
    }

    fn size(&self) -> usize {
        self.record_ids().len()
    }

    fn record_ids(&self) -> Vec<DataId> {
        let mut ids: FnvHashSet<DataId> = self.base.record_ids().into_iter().collect();
        ids.extend(self.sink.record_ids());
        ids.into_iter().collect()
    }
}

/// The source handed to updaters.
///
/// Record proxies borrow it and write through it, so several proxies can be alive at once.
pub struct RecordSourceProxy<'a> {
    mutator: RefCell<RecordSourceMutator<'a>>
}

impl<'a> fmt::Debug for RecordSourceProxy<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSourceProxy")
            .field("sink", self.mutator.borrow().sink())
            .finish()
    }
}

impl<'a> RecordSourceProxy<'a> {
    pub fn new(base: &'a dyn RecordSource) -> Self {
        Self::from_mutator(RecordSourceMutator::new(base))
    }

    pub fn from_mutator(mutator: RecordSourceMutator<'a>) -> Self {
        RecordSourceProxy {
            mutator: RefCell::new(mutator)
        }
    }

    pub fn get(&self, id: &str) -> Option<RecordProxy<'_, 'a>> {
        match self.mutator.borrow().status(id) {
            RecordState::Existent => Some(RecordProxy::new(self, id)),
            _ => None
        }
    }

    /// Create a new record. Fails if a record with this id exists.
    pub fn create(&self, id: &str, typename: &str) -> Result<RecordProxy<'_, 'a>, StoreError> {
        let mut mutator = self.mutator.borrow_mut();
        if mutator.status(id) == RecordState::Existent {
            return Err(StoreError::InvariantViolation(format!(
                "cannot create a record with id `{}`, it already exists",
                id
            )));
        }
        mutator.create(id, typename);
        drop(mutator);
        Ok(RecordProxy::new(self, id))
    }

    /// The record with this id, created if it doesn't exist.
    pub fn get_or_create(&self, id: &str, typename: &str) -> RecordProxy<'_, 'a> {
        let mut mutator = self.mutator.borrow_mut();
        if mutator.status(id) != RecordState::Existent {
            mutator.create(id, typename);
        }
        drop(mutator);
        RecordProxy::new(self, id)
    }

    /// Delete a record. The root record can't be deleted.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        if id == ROOT_ID {
            return Err(StoreError::InvariantViolation(
                "the root record cannot be deleted".to_string()
            ));
        }
        self.mutator.borrow_mut().delete(id);
        Ok(())
    }

    /// The root record, created if needed.
    pub fn root(&self) -> RecordProxy<'_, 'a> {
        self.get_or_create(ROOT_ID, ROOT_TYPE)
    }

    /// Read a selector against the current state of the proxy.
    pub fn read(&self, selector: &SingularReaderSelector) -> Snapshot {
        read(&*self.mutator.borrow(), selector)
    }

    /// Merge a batch of records into the proxy.
    pub fn publish_source(&self, source: &RecordSourceMap) {
        self.mutator.borrow_mut().publish_source(source);
    }

    /// Everything that was written.
    pub fn into_sink(self) -> RecordSourceMap {
        self.mutator.into_inner().into_sink()
    }

    fn with_record<T, F: FnOnce(&Record) -> T>(&self, id: &str, f: F) -> Option<T> {
        self.mutator.borrow().get(id).map(|record| f(record))
    }

    fn update_record<F: FnOnce(&mut Record)>(&self, id: &str, f: F) {
        match self.mutator.borrow_mut().get_mut(id) {
            Some(record) => f(record),
            None => tracing::warn!(id = %id, "cannot write to a record that doesn't exist")
        }
    }
}

fn storage_key(name: &str, args: Option<&Variables>) -> String {
    match args {
        Some(args) => format_storage_key(name, args),
        None => name.to_string()
    }
}

/// A handle to one record of a [`RecordSourceProxy`](./struct.RecordSourceProxy.html).
///
/// Fields are addressed by name and, for fields with arguments, the argument values.
#[derive(Clone)]
pub struct RecordProxy<'p, 'a> {
    source: &'p RecordSourceProxy<'a>,
    id: DataId
}

impl<'p, 'a> fmt::Debug for RecordProxy<'p, 'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordProxy").field(&self.id).finish()
    }
}

impl<'p, 'a> PartialEq for RecordProxy<'p, 'a> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<'p, 'a> RecordProxy<'p, 'a> {
    fn new(source: &'p RecordSourceProxy<'a>, id: &str) -> Self {
        RecordProxy {
            source,
            id: id.to_string()
        }
    }

    pub fn get_data_id(&self) -> &str {
        &self.id
    }

    pub fn get_type(&self) -> Option<String> {
        self.source
            .with_record(&self.id, |record| record.typename().to_string())
    }

    pub fn get_value(&self, name: &str, args: Option<&Variables>) -> Option<Value> {
        let key = storage_key(name, args);
        self.source
            .with_record(&self.id, |record| record.get_value(&key).cloned())
            .flatten()
    }

    pub fn set_value(&self, value: Value, name: &str, args: Option<&Variables>) -> &Self {
        let key = storage_key(name, args);
        self.source
            .update_record(&self.id, |record| record.set_value(key, value));
        self
    }

    pub fn get_linked_record(&self, name: &str, args: Option<&Variables>) -> Option<Self> {
        let key = storage_key(name, args);
        let id = self
            .source
            .with_record(&self.id, |record| record.get_link(&key).map(str::to_string))
            .flatten()?;
        self.source.get(&id)
    }

    pub fn set_linked_record(
        &self,
        record: &RecordProxy<'_, '_>,
        name: &str,
        args: Option<&Variables>
    ) -> &Self {
        let key = storage_key(name, args);
        let id = record.id.clone();
        self.source
            .update_record(&self.id, |record| record.set_link(key, id));
        self
    }

    /// The linked record, or a new client record linked in its place.
    pub fn get_or_create_linked_record(
        &self,
        name: &str,
        typename: &str,
        args: Option<&Variables>
    ) -> Self {
        if let Some(linked) = self.get_linked_record(name, args) {
            return linked;
        }
        let key = storage_key(name, args);
        let id = generate_client_id(&self.id, &key, None);
        let linked = self.source.get_or_create(&id, typename);
        self.set_linked_record(&linked, name, args);
        linked
    }

    /// The linked records. `None` entries are null list items or deleted records.
    pub fn get_linked_records(
        &self,
        name: &str,
        args: Option<&Variables>
    ) -> Option<Vec<Option<Self>>> {
        let key = storage_key(name, args);
        let ids = self
            .source
            .with_record(&self.id, |record| record.get_links(&key).map(<[_]>::to_vec))
            .flatten()?;
        Some(
            ids.into_iter()
                .map(|id| id.and_then(|id| self.source.get(&id)))
                .collect()
        )
    }

    pub fn set_linked_records(
        &self,
        records: &[Option<RecordProxy<'_, '_>>],
        name: &str,
        args: Option<&Variables>
    ) -> &Self {
        let key = storage_key(name, args);
        let ids: Vec<Option<DataId>> = records
            .iter()
            .map(|record| record.as_ref().map(|record| record.id.clone()))
            .collect();
        self.source
            .update_record(&self.id, |record| record.set(key, RecordValue::Links(ids)));
        self
    }

    /// Copy every field of `source` onto this record.
    pub fn copy_fields_from(&self, source: &RecordProxy<'_, '_>) -> &Self {
        let fields = self
            .source
            .with_record(&source.id, |record| Record::clone(record));
        match fields {
            Some(fields) => self
                .source
                .update_record(&self.id, |record| record.copy_fields_from(&fields)),
            None => tracing::warn!(id = %source.id, "cannot copy fields from a missing record")
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> RecordSourceMap {
        let mut base = RecordSourceMap::new();
        let mut root = Record::new(ROOT_ID, ROOT_TYPE);
        root.set_link("me", "User:1");
        base.set(root);
        let mut user = Record::new("User:1", "User");
        user.set_value("name", json!("Alice"));
        base.set(user);
        base
    }

    #[test]
    fn writes_go_to_the_sink() {
        let base = base();
        let proxy = RecordSourceProxy::new(&base);
        let me = proxy.root().get_linked_record("me", None).unwrap();
        assert_eq!(me.get_type(), Some("User".to_string()));
        me.set_value(json!("Zuck"), "name", None);
        assert_eq!(me.get_value("name", None), Some(json!("Zuck")));

        let sink = proxy.into_sink();
        assert_eq!(
            sink.get("User:1").unwrap().get_value("name"),
            Some(&json!("Zuck"))
        );
        assert!(sink.get(ROOT_ID).is_none());
        assert_eq!(
            base.get("User:1").unwrap().get_value("name"),
            Some(&json!("Alice"))
        );
    }

    #[test]
    fn arguments_are_part_of_the_key() {
        let base = base();
        let proxy = RecordSourceProxy::new(&base);
        let me = proxy.get("User:1").unwrap();
        let args = json!({ "size": 32 }).as_object().cloned().unwrap();
        me.set_value(json!("small.png"), "avatar", Some(&args));
        assert_eq!(me.get_value("avatar(size:32)", None), Some(json!("small.png")));
        assert_eq!(me.get_value("avatar", None), None);
    }

    #[test]
    fn create_link_and_delete() {
        let base = base();
        let proxy = RecordSourceProxy::new(&base);
        let root = proxy.root();
        let friend = proxy.create("User:2", "User").unwrap();
        friend.set_value(json!("Bob"), "name", None);
        let me = proxy.get("User:1").unwrap();
        me.set_linked_records(&[Some(friend.clone()), None], "friends", None);

        let friends = me.get_linked_records("friends", None).unwrap();
        assert_eq!(friends.len(), 2);
        assert_eq!(friends[0].as_ref().map(RecordProxy::get_data_id), Some("User:2"));
        assert!(friends[1].is_none());
        assert!(proxy.create("User:2", "User").is_err());

        proxy.delete("User:1").unwrap();
        assert!(proxy.get("User:1").is_none());
        assert!(root.get_linked_record("me", None).is_none());
        assert!(proxy.delete(ROOT_ID).is_err());

        let sink = proxy.into_sink();
        assert_eq!(sink.status("User:1"), RecordState::Nonexistent);
    }

    #[test]
    fn linked_client_records_are_created_once() {
        let base = base();
        let proxy = RecordSourceProxy::new(&base);
        let me = proxy.get("User:1").unwrap();
        let settings = me.get_or_create_linked_record("settings", "Settings", None);
        assert_eq!(settings.get_data_id(), "client:User:1:settings");
        let again = me.get_or_create_linked_record("settings", "Settings", None);
        assert_eq!(settings, again);
    }

    #[test]
    fn copy_fields_keeps_the_identity() {
        let base = base();
        let proxy = RecordSourceProxy::new(&base);
        let copy = proxy.create("client:draft", "User").unwrap();
        copy.copy_fields_from(&proxy.get("User:1").unwrap());
        assert_eq!(copy.get_value("name", None), Some(json!("Alice")));
        assert_eq!(copy.get_data_id(), "client:draft");
    }
}
