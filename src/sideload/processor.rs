use crate::core::field::FieldKind;
use crate::core::record::{Record, RecordGraph, RecordKey, Relation};
use crate::core::resolver::{ActiveField, ActiveFieldSet, Expansion};
use crate::sideload::envelope::Envelope;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};
use std::collections::{HashSet, VecDeque};

/// Flattens rendered roots and their related objects into an [`Envelope`]
pub struct SideloadProcessor<'g> {
    graph: &'g RecordGraph,
    sideloading: bool,
    debug: bool,
}

type Queue<'a, 's> = VecDeque<(RecordKey, &'a ActiveFieldSet<'s>)>;

impl<'g> SideloadProcessor<'g> {
    pub fn new(graph: &'g RecordGraph) -> Self {
        Self {
            graph,
            sideloading: true,
            debug: false,
        }
    }

    /// With sideloading off every expanded relation is embedded inline
    pub fn sideloading(mut self, enabled: bool) -> Self {
        self.sideloading = enabled;
        self
    }

    /// Adds `_meta: {id, type}` to every rendered object
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Render a collection under `root_key`
    pub fn flatten_many(
        &self,
        root_key: &str,
        roots: &[Record],
        set: &ActiveFieldSet<'_>,
    ) -> Envelope {
        let (entries, linked) = self.flatten(roots, set);
        let mut envelope = Envelope::many(root_key, entries);
        envelope.linked = linked;
        envelope
    }

    /// Render a single object under `root_key`
    pub fn flatten_one(&self, root_key: &str, root: &Record, set: &ActiveFieldSet<'_>) -> Envelope {
        let (mut entries, linked) = self.flatten(std::slice::from_ref(root), set);
        let mut envelope = Envelope::one(root_key, entries.pop().unwrap_or(Value::Null));
        envelope.linked = linked;
        envelope
    }

    fn flatten<'a, 's>(
        &self,
        roots: &[Record],
        set: &'a ActiveFieldSet<'s>,
    ) -> (Vec<Value>, IndexMap<String, Vec<Value>>) {
        let mut seen: HashSet<RecordKey> = roots.iter().filter_map(Record::key).collect();
        let mut queue: Queue<'a, 's> = VecDeque::new();

        let entries = roots
            .iter()
            .map(|root| self.render(root, set, &mut queue))
            .collect();

        let mut linked: IndexMap<String, Vec<Value>> = IndexMap::new();
        while let Some((key, target_set)) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            // a row that vanished is left out, not an error
            let Some(record) = self.graph.get(&key) else {
                continue;
            };
            let rendered = self.render(record, target_set, &mut queue);
            linked.entry(key.type_name).or_default().push(rendered);
        }

        (entries, linked)
    }

    fn render<'a, 's>(
        &self,
        record: &Record,
        set: &'a ActiveFieldSet<'s>,
        queue: &mut Queue<'a, 's>,
    ) -> Value {
        let mut object = Map::new();
        for field in &set.fields {
            let value = match field.spec.kind {
                FieldKind::RelationOne | FieldKind::RelationMany | FieldKind::GenericRelation => {
                    self.render_relation(record, field, queue)
                }
                FieldKind::Count => self.count(record, &field.spec.source),
                FieldKind::Computed | FieldKind::Plain => self.render_value(record, field),
            };
            object.insert(field.spec.name.clone(), value);
        }

        if self.debug {
            object.insert(
                "_meta".to_string(),
                json!({
                    "id": record.id.as_ref().map(|id| id.to_value()),
                    "type": record.type_name,
                }),
            );
        }
        Value::Object(object)
    }

    fn render_value(&self, record: &Record, field: &ActiveField<'_>) -> Value {
        if let Some(getter) = &field.spec.getter {
            return getter(record, self.graph);
        }
        self.graph.resolve_path(record, &field.spec.source)
    }

    /// Distinct related objects, or list length for attribute data
    fn count(&self, record: &Record, source: &str) -> Value {
        if let Some(relation) = self.graph.follow(record, source) {
            let distinct: IndexSet<&RecordKey> = relation.keys().into_iter().collect();
            return json!(distinct.len());
        }
        match self.graph.resolve_path(record, source) {
            Value::Array(items) => json!(items.len()),
            Value::Null => json!(0),
            _ => json!(1),
        }
    }

    fn render_relation<'a, 's>(
        &self,
        record: &Record,
        field: &'a ActiveField<'s>,
        queue: &mut Queue<'a, 's>,
    ) -> Value {
        let spec = field.spec;
        if let Some(getter) = &spec.getter {
            return getter(record, self.graph);
        }
        let Some(relation) = self.graph.follow(record, &spec.source) else {
            return Value::Null;
        };
        let generic = spec.kind == FieldKind::GenericRelation;

        if let Expansion::IdOnly = field.expansion {
            return match relation {
                Relation::One(None) => Value::Null,
                Relation::One(Some(key)) => reference(&key, generic),
                Relation::Many(keys) => {
                    Value::Array(keys.iter().map(|k| reference(k, generic)).collect())
                }
            };
        }

        let inline = spec.embed || !self.sideloading;
        let expansion: &'a Expansion<'s> = &field.expansion;
        let mut render_key = |key: &RecordKey| -> Option<Value> {
            let target = self.graph.get(key)?;
            let Some(target_set) = set_for(expansion, &key.type_name) else {
                return Some(reference(key, generic));
            };
            if inline {
                let mut rendered = self.render(target, target_set, queue);
                if generic && let Value::Object(map) = &mut rendered {
                    map.insert("type".to_string(), json!(key.type_name));
                }
                Some(rendered)
            } else {
                queue.push_back((key.clone(), target_set));
                Some(reference(key, generic))
            }
        };

        match relation {
            Relation::One(None) => Value::Null,
            Relation::One(Some(key)) => render_key(&key).unwrap_or(Value::Null),
            Relation::Many(keys) => Value::Array(keys.iter().filter_map(&mut render_key).collect()),
        }
    }
}

fn set_for<'a, 's>(expansion: &'a Expansion<'s>, type_name: &str) -> Option<&'a ActiveFieldSet<'s>> {
    match expansion {
        Expansion::IdOnly => None,
        Expansion::Nested(set) => Some(set.as_ref()),
        Expansion::Generic(by_type) => by_type.get(type_name),
    }
}

/// In-place representation of a related object
fn reference(key: &RecordKey, generic: bool) -> Value {
    if generic {
        json!({"type": key.type_name, "id": key.id.to_value()})
    } else {
        key.id.to_value()
    }
}
