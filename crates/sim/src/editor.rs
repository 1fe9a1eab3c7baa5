//! A scripted stand-in for an editor UI.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use stagehand_save::{DocumentSnapshot, SnapshotProvider};

pub struct ScriptedEditor {
    state: Mutex<Value>,
}

impl ScriptedEditor {
    pub fn new(name: &str) -> Self {
        Self {
            state: Mutex::new(json!({ "name": name, "cells": {} })),
        }
    }

    /// Write one cell, the way a grid edit would.
    pub fn edit(&self, cell: &str, value: impl Into<Value>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(cells) = state.get_mut("cells").and_then(Value::as_object_mut) {
            cells.insert(cell.to_string(), value.into());
        }
    }
}

#[async_trait]
impl SnapshotProvider for ScriptedEditor {
    async fn document_snapshot(&self) -> anyhow::Result<DocumentSnapshot> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("editor state poisoned"))?;
        Ok(DocumentSnapshot::new(state.clone()))
    }
}
