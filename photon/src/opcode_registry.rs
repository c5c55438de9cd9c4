//! A pluggable mapping from event/operation code to a human label, used
//! only for debug logging. It never affects decoding outcomes.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct OpcodeRegistry {
    event_labels: HashMap<u8, &'static str>,
    operation_labels: HashMap<u8, &'static str>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, code: u8, label: &'static str) -> Self {
        self.event_labels.insert(code, label);
        self
    }

    pub fn with_operation(mut self, code: u8, label: &'static str) -> Self {
        self.operation_labels.insert(code, label);
        self
    }

    pub fn event_label(&self, code: u8) -> &str {
        self.event_labels.get(&code).copied().unwrap_or("unknown")
    }

    pub fn operation_label(&self, code: u8) -> &str {
        self.operation_labels
            .get(&code)
            .copied()
            .unwrap_or("unknown")
    }
}
