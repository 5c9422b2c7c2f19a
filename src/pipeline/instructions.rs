//! The editable, ordered instruction list of a session.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("instruction list is empty")]
    Empty,

    #[error("instruction index {index} is out of range (list has {len} entries)")]
    OutOfRange { index: usize, len: usize },

    #[error("instruction {index} is blank")]
    BlankInstruction { index: usize },

    #[error("topic must not be empty")]
    EmptyTopic,
}

/// Ordered instructions; entry 0 receives the run's topic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstructionList {
    items: Vec<String>,
    #[serde(skip)]
    seeded: bool,
    #[serde(skip)]
    topic_substituted: bool,
    /// Entry 0 as it was before the current substitution.
    #[serde(skip)]
    pristine_first: Option<String>,
}

impl InstructionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(list: Vec<String>) -> Self {
        let mut store = Self::new();
        store.seed(list);
        store
    }

    /// Initialise the list. Only the first call has an effect.
    pub fn seed(&mut self, list: Vec<String>) {
        if self.seeded {
            return;
        }
        self.items = list;
        self.seeded = true;
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn topic_substituted(&self) -> bool {
        self.topic_substituted
    }

    /// Prepare for a new run: allow one more substitution and undo the previous one.
    pub fn begin_run(&mut self) {
        if let Some(first) = self.pristine_first.take() {
            if let Some(slot) = self.items.first_mut() {
                *slot = first;
            }
        }
        self.topic_substituted = false;
    }

    /// Append `" " + topic` to the first instruction, once per run.
    pub fn substitute_topic(&mut self, topic: &str) -> Result<(), ValidationError> {
        if self.topic_substituted {
            return Ok(());
        }
        let first = self.items.first_mut().ok_or(ValidationError::Empty)?;
        self.pristine_first = Some(first.clone());
        first.push(' ');
        first.push_str(topic);
        self.topic_substituted = true;
        Ok(())
    }

    /// Replace the instruction at `index`.
    pub fn edit(&mut self, index: usize, text: impl Into<String>) -> Result<(), ValidationError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(ValidationError::OutOfRange { index, len })?;
        *slot = text.into();
        if index == 0 {
            self.pristine_first = None;
        }
        Ok(())
    }

    pub fn append(&mut self, text: impl Into<String>) {
        self.items.push(text.into());
    }

    /// Remove the final instruction. Does nothing on an empty list.
    pub fn remove_last(&mut self) -> Option<String> {
        let removed = self.items.pop();
        if self.items.is_empty() {
            self.pristine_first = None;
        }
        removed
    }

    /// Every entry must carry text before a run may start.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::Empty);
        }
        match self.items.iter().position(|i| i.trim().is_empty()) {
            Some(index) => Err(ValidationError::BlankInstruction { index }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> InstructionList {
        InstructionList::seeded(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn seed_only_applies_once() {
        let mut store = list(&["a"]);
        store.seed(vec!["x".into(), "y".into()]);
        assert_eq!(store.as_slice(), &["a".to_string()]);
        assert!(store.is_seeded());
    }

    #[test]
    fn substitution_appends_topic_with_space() {
        let mut store = list(&["Research {topic}", "Summarize findings"]);
        store.begin_run();
        store.substitute_topic("toothbrushes").unwrap();
        assert_eq!(store.get(0), Some("Research {topic} toothbrushes"));
        assert_eq!(store.get(1), Some("Summarize findings"));
    }

    #[test]
    fn substitution_is_idempotent_within_a_run() {
        let mut store = list(&["Research"]);
        store.begin_run();
        store.substitute_topic("toothbrushes").unwrap();
        store.substitute_topic("toothbrushes").unwrap();
        store.substitute_topic("something else").unwrap();
        assert_eq!(store.get(0), Some("Research toothbrushes"));
        assert!(store.topic_substituted());
    }

    #[test]
    fn new_run_replaces_previous_topic() {
        let mut store = list(&["Research"]);
        store.begin_run();
        store.substitute_topic("toothbrushes").unwrap();
        store.begin_run();
        assert!(!store.topic_substituted());
        assert_eq!(store.get(0), Some("Research"));
        store.substitute_topic("razors").unwrap();
        assert_eq!(store.get(0), Some("Research razors"));
    }

    #[test]
    fn editing_first_entry_becomes_new_base() {
        let mut store = list(&["Research"]);
        store.begin_run();
        store.substitute_topic("toothbrushes").unwrap();
        store.edit(0, "Investigate").unwrap();
        store.begin_run();
        assert_eq!(store.get(0), Some("Investigate"));
    }

    #[test]
    fn substitution_on_empty_list_fails() {
        let mut store = InstructionList::seeded(Vec::new());
        assert_eq!(store.substitute_topic("x"), Err(ValidationError::Empty));
        assert!(!store.topic_substituted());
    }

    #[test]
    fn edit_out_of_range_leaves_list_unchanged() {
        let mut store = list(&["a", "b"]);
        let err = store.edit(2, "c").unwrap_err();
        assert_eq!(err, ValidationError::OutOfRange { index: 2, len: 2 });
        assert_eq!(store.as_slice(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn edit_replaces_in_place() {
        let mut store = list(&["a", "b"]);
        store.edit(1, "B").unwrap();
        assert_eq!(store.get(1), Some("B"));
    }

    #[test]
    fn append_and_remove_last() {
        let mut store = list(&["a"]);
        store.append("");
        assert_eq!(store.len(), 2);
        assert_eq!(store.remove_last(), Some(String::new()));
        assert_eq!(store.remove_last(), Some("a".to_string()));
        assert_eq!(store.remove_last(), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn validate_rejects_blank_entries() {
        let mut store = list(&["a"]);
        store.append("   ");
        assert_eq!(
            store.validate(),
            Err(ValidationError::BlankInstruction { index: 1 })
        );
        assert_eq!(InstructionList::new().validate(), Err(ValidationError::Empty));
        assert!(list(&["a"]).validate().is_ok());
    }

    #[test]
    fn serializes_as_items_only() {
        let value = serde_json::to_value(list(&["a"])).unwrap();
        assert_eq!(value, serde_json::json!({"items": ["a"]}));
    }
}
