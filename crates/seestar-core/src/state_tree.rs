//! Reconstruction of the device's hierarchical activity state
//!
//! The device reports activity as a flat stream of events, each tagged with
//! the `route` of ancestor kinds it runs under. Folding those events into a
//! tree yields the same shape the device's one-shot status query returns:
//!
//! ```text
//! root
//! └── View              { state: working, target_name: .., stage: AutoGoto }
//!     └── AutoGoto      { state: working, stage: ScopeGoto }
//!         └── ScopeGoto { state: complete, cur_ra_dec: [..] }
//! ```
//!
//! The tree has a single writer (the event connection's read loop). Readers
//! get an owned [`StateSnapshot`], never a reference into live state.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use crate::events::EventEnvelope;

/// Key under which [`StateNode::to_json`] renders the stage
pub const STAGE_KEY: &str = "stage";

/// Envelopes kept in the recent-event log
pub const RECENT_CAPACITY: usize = 500;

/// One kind at one position in the tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateNode {
    /// Payload fields merged from every envelope of this kind at this position
    pub fields: Map<String, Value>,
    /// Kind of the child most recently seen in an active lifecycle state
    pub stage: Option<String>,
    pub children: BTreeMap<String, StateNode>,
}

impl StateNode {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.stage.is_none() && self.children.is_empty()
    }

    pub fn child(&self, kind: &str) -> Option<&StateNode> {
        self.children.get(kind)
    }

    /// Walk down by kind names; an empty path returns `self`
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&StateNode> {
        path.iter()
            .try_fold(self, |node, step| node.children.get(step.as_ref()))
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Lifecycle `state` field as last reported, if any
    pub fn state(&self) -> Option<&str> {
        self.fields.get("state").and_then(Value::as_str)
    }

    /// Field-level last-write-wins merge
    fn merge_fields(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Render as nested JSON: fields, then `stage`, then one key per child.
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(stage) = &self.stage {
            object.insert(STAGE_KEY.to_string(), Value::String(stage.clone()));
        }
        for (kind, child) in &self.children {
            object.insert(kind.clone(), child.to_json());
        }
        Value::Object(object)
    }
}

/// Immutable copy of the reconstructed state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub root: StateNode,
    /// Fields of the most recent envelope per kind, regardless of position
    pub latest: BTreeMap<String, Map<String, Value>>,
    /// Most recent envelopes, oldest first
    pub recent: Vec<Arc<EventEnvelope>>,
    pub events_applied: u64,
    pub updated_at: Option<DateTime<Local>>,
}

impl StateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&StateNode> {
        self.root.get_path(path)
    }

    pub fn to_json(&self) -> Value {
        self.root.to_json()
    }
}

/// Mutable tree owned by one event connection session
#[derive(Debug, Default)]
pub struct StateTree {
    root: StateNode,
    latest: BTreeMap<String, Map<String, Value>>,
    recent: VecDeque<Arc<EventEnvelope>>,
    events_applied: u64,
    updated_at: Option<DateTime<Local>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &StateNode {
        &self.root
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Fold one envelope into the tree.
    ///
    /// Route elements are created as empty nodes when first seen. The target
    /// node's fields are merged per key. For nested events the parent's
    /// `stage` becomes this kind when the event is active (start/working), or
    /// when the parent has no stage yet and the event carries any lifecycle
    /// state. Root-level events never touch a stage.
    pub fn apply(&mut self, envelope: &EventEnvelope) {
        let kind = envelope.kind.as_str();

        let mut parent = &mut self.root;
        for step in &envelope.route {
            parent = parent.children.entry(step.clone()).or_default();
        }

        parent
            .children
            .entry(kind.to_string())
            .or_default()
            .merge_fields(&envelope.fields);

        if !envelope.is_root_level() {
            if let Some(state) = &envelope.state {
                if state.is_active() || parent.stage.is_none() {
                    parent.stage = Some(kind.to_string());
                }
            }
        }

        self.latest
            .insert(kind.to_string(), envelope.fields.clone());
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(Arc::new(envelope.clone()));
        self.events_applied += 1;
        self.updated_at = Some(Local::now());
    }

    /// Deep copy for readers
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            root: self.root.clone(),
            latest: self.latest.clone(),
            recent: self.recent.iter().cloned().collect(),
            events_applied: self.events_applied,
            updated_at: self.updated_at,
        }
    }

    /// Drop everything; used when the session that fed the tree ends
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
