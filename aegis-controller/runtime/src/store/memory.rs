//! An in-process store with API-server semantics for finalizers, status
//! subresources, and resource versions.

use super::{Error, Object, Result, Store};
use kube::ResourceExt;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

type Key = (String, String, String);

#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    writes: Vec<String>,
}

fn key<K: Object>(namespace: &str, name: &str) -> Key {
    (
        K::kind(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn decode<K: Object>(value: &Value) -> K {
    serde_json::from_value(value.clone()).expect("stored objects must decode")
}

fn encode<K: Object>(obj: &K) -> Value {
    serde_json::to_value(obj).expect("objects must encode")
}

fn finalizers(value: &Value) -> usize {
    value["metadata"]["finalizers"]
        .as_array()
        .map(Vec::len)
        .unwrap_or(0)
}

fn matches_labels(value: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => value["metadata"]["labels"][k].as_str() == Some(v),
            None => false,
        })
}

impl MemoryStore {
    /// Inserts objects as if they had been created through the API.
    pub(crate) async fn seed<K: Object>(&self, obj: K) -> K {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        self.create(&namespace, &obj).await.expect("seeded object must not exist")
    }

    /// A log of every write, as `verb kind/name`.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub(crate) fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    pub(crate) fn contains<K: Object>(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&key::<K>(namespace, name))
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record<K: Object>(&mut self, verb: &str, name: &str) {
        self.writes.push(format!("{verb} {}/{name}", K::kind(&())));
    }

    fn check_version<K: Object>(&self, stored: &Value, obj: &K, ns: &str, name: &str) -> Result<()> {
        match obj.resource_version() {
            Some(rv) if Some(rv.as_str()) != stored["metadata"]["resourceVersion"].as_str() => {
                Err(Error::conflict::<K>(ns, name))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(decode)
            .ok_or_else(|| Error::not_found::<K>(namespace, name))
    }

    async fn list<K: Object>(&self, namespace: &str, labels: &str) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), v)| *k == kind && ns == namespace && matches_labels(v, labels))
            .map(|(_, v)| decode(v))
            .collect())
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let mut state = self.state.lock().unwrap();
        let key = key::<K>(namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists::<K>(namespace, &name));
        }

        let version = state.next_version();
        let mut value = encode(obj);
        value["metadata"]["namespace"] = namespace.into();
        value["metadata"]["uid"] = format!("uid-{version}").into();
        value["metadata"]["resourceVersion"] = version.into();
        state.record::<K>("create", &name);
        state.objects.insert(key, value.clone());
        Ok(decode(&value))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut state = self.state.lock().unwrap();
        let key = key::<K>(&namespace, &name);
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(&namespace, &name))?;
        state.check_version(&stored, obj, &namespace, &name)?;

        let mut value = encode(obj);
        // Status and deletion state are owned by the server.
        value["status"] = stored["status"].clone();
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        if let Some(obj) = value.as_object_mut() {
            if obj.get("status").is_some_and(Value::is_null) {
                obj.remove("status");
            }
        }
        if let Some(meta) = value["metadata"].as_object_mut() {
            if meta.get("deletionTimestamp").is_some_and(Value::is_null) {
                meta.remove("deletionTimestamp");
            }
        }
        value["metadata"]["resourceVersion"] = state.next_version().into();
        state.record::<K>("update", &name);

        if !value["metadata"]["deletionTimestamp"].is_null() && finalizers(&value) == 0 {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value.clone());
        }
        Ok(decode(&value))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut state = self.state.lock().unwrap();
        let key = key::<K>(&namespace, &name);
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(&namespace, &name))?;
        state.check_version(&stored, obj, &namespace, &name)?;

        stored["status"] = encode(obj)["status"].clone();
        stored["metadata"]["resourceVersion"] = state.next_version().into();
        state.record::<K>("update-status", &name);
        state.objects.insert(key, stored.clone());
        Ok(decode(&stored))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = key::<K>(namespace, name);
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(Error::not_found::<K>(namespace, name));
        };
        state.record::<K>("delete", name);

        if finalizers(&stored) == 0 {
            state.objects.remove(&key);
            return Ok(());
        }
        if stored["metadata"]["deletionTimestamp"].is_null() {
            stored["metadata"]["deletionTimestamp"] = "2026-01-01T00:00:00Z".into();
            stored["metadata"]["resourceVersion"] = state.next_version().into();
            state.objects.insert(key, stored);
        }
        Ok(())
    }
}
