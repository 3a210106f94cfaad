//! Translates kube-runtime watch events into lifecycle actions
//!
//! kube's watcher reports `Apply` for both creations and changes, and
//! restarts with a full relist (`Init`, `InitApply`*, `InitDone`) after a
//! disconnect. The tracker remembers the entities it has dispatched so it
//! can tell adds from modifications, drop relisted objects that did not
//! change, and emit deletes for objects that vanished while disconnected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kube::{runtime::watcher::Event, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::entity::EntityInfo;
use crate::kinds::{ConvertFn, PredicateFn};
use crate::metrics;
use crate::operator::{Action, Dispatcher};

struct Known<T> {
    namespace: Option<String>,
    entity: T,
}

/// Per-watch memory of dispatched entities
pub struct EventTracker<K, T> {
    convert: ConvertFn<K, T>,
    predicate: PredicateFn<K>,
    full_reconciliation_run: Arc<AtomicBool>,
    known: HashMap<String, Known<T>>,
    relisted: Option<HashSet<String>>,
}

fn object_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

impl<K, T> EventTracker<K, T>
where
    K: Resource,
    T: EntityInfo,
{
    pub fn new(
        convert: ConvertFn<K, T>,
        predicate: PredicateFn<K>,
        full_reconciliation_run: Arc<AtomicBool>,
    ) -> Self {
        Self {
            convert,
            predicate,
            full_reconciliation_run,
            known: HashMap::new(),
            relisted: None,
        }
    }

    /// Number of entities currently tracked
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Apply one watch event, dispatching whatever it implies
    pub async fn handle(&mut self, event: Event<K>, dispatcher: &Dispatcher<T>) {
        match event {
            Event::Init => {
                debug!(operator = %dispatcher.operator_name(), "Relisting resources");
                self.relisted = Some(HashSet::new());
            }
            Event::InitApply(obj) => self.apply(obj, true, dispatcher).await,
            Event::Apply(obj) => self.apply(obj, false, dispatcher).await,
            Event::Delete(obj) => self.delete(obj, dispatcher).await,
            Event::InitDone => self.finish_relist(dispatcher).await,
        }
    }

    async fn apply(&mut self, obj: K, relist: bool, dispatcher: &Dispatcher<T>) {
        let key = object_key(&obj);
        if relist {
            if let Some(seen) = self.relisted.as_mut() {
                seen.insert(key.clone());
            }
        }

        if !(self.predicate)(&obj) {
            debug!(operator = %dispatcher.operator_name(), object = %key, "Ignoring unsupported resource");
            return;
        }

        let Some(entity) = self.to_entity(&obj, &key, dispatcher) else {
            return;
        };

        let action = match self.known.get(&key) {
            None => Action::Add,
            // resync of an unchanged object
            Some(known) if relist && known.entity == entity => return,
            Some(_) => Action::Modify,
        };

        let namespace = obj.namespace();
        self.log_event(action, &key, dispatcher);
        let _ = dispatcher
            .dispatch(action, &entity, namespace.as_deref())
            .await;
        self.known.insert(key, Known { namespace, entity });
    }

    async fn delete(&mut self, obj: K, dispatcher: &Dispatcher<T>) {
        let key = object_key(&obj);
        // only entities that were added can be deleted
        let Some(previous) = self.known.remove(&key) else {
            debug!(operator = %dispatcher.operator_name(), object = %key, "Ignoring delete of untracked resource");
            return;
        };

        let entity = self
            .to_entity(&obj, &key, dispatcher)
            .unwrap_or(previous.entity);

        self.log_event(Action::Delete, &key, dispatcher);
        let _ = dispatcher
            .on_delete(&entity, obj.namespace().as_deref())
            .await;
    }

    async fn finish_relist(&mut self, dispatcher: &Dispatcher<T>) {
        let Some(seen) = self.relisted.take() else {
            return;
        };

        let vanished: Vec<String> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        for key in vanished {
            if let Some(known) = self.known.remove(&key) {
                self.log_event(Action::Delete, &key, dispatcher);
                let _ = dispatcher
                    .on_delete(&known.entity, known.namespace.as_deref())
                    .await;
            }
        }
    }

    fn to_entity(&self, obj: &K, key: &str, dispatcher: &Dispatcher<T>) -> Option<T> {
        match (self.convert)(obj) {
            Ok(entity) => Some(entity),
            Err(e) => {
                metrics::CONVERSION_FAILURES
                    .with_label_values(&[dispatcher.operator_name()])
                    .inc();
                warn!(
                    operator = %dispatcher.operator_name(),
                    object = %key,
                    error = %e,
                    "Skipping resource that failed conversion"
                );
                None
            }
        }
    }

    fn log_event(&self, action: Action, key: &str, dispatcher: &Dispatcher<T>) {
        if self.full_reconciliation_run.load(Ordering::SeqCst) {
            debug!(operator = %dispatcher.operator_name(), action = action.as_str(), object = %key, "Event");
        } else {
            info!(operator = %dispatcher.operator_name(), action = action.as_str(), object = %key, "Event");
        }
    }
}
