//! Per-task accumulators for in-flight AI tasks.
//!
//! The registry is an arena keyed by [`TaskId`]. Nothing outside it holds a
//! live reference: readers get clones, and terminal handling takes the entry
//! out by value.

use std::collections::HashMap;

use serde::Serialize;
use st_types::{Segment, TaskId, TokenUsage, ToolInvocation, ToolStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStreamState {
    pub task_id: TaskId,
    pub model_name: String,
    pub sender_label: String,
    pub content_text: String,
    pub thinking_text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub segments: Vec<Segment>,
    pub token_usage: Option<TokenUsage>,
    /// Output was cut by the model's max-token limit at least once.
    pub truncated: bool,
    /// Insertion order within the registry.
    pub started_seq: u64,
}

impl TaskStreamState {
    pub fn new(
        task_id: TaskId,
        model_name: impl Into<String>,
        sender_label: impl Into<String>,
        started_seq: u64,
    ) -> Self {
        Self {
            task_id,
            model_name: model_name.into(),
            sender_label: sender_label.into(),
            content_text: String::new(),
            thinking_text: String::new(),
            tool_invocations: Vec::new(),
            segments: Vec::new(),
            token_usage: None,
            truncated: false,
            started_seq,
        }
    }

    /// Append prose. Consecutive prose shares one content segment.
    pub fn append_content(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.content_text.push_str(text);
        match self.segments.last_mut() {
            Some(Segment::Content { text: last }) => last.push_str(text),
            _ => self.segments.push(Segment::Content {
                text: text.to_string(),
            }),
        }
    }

    pub fn append_thinking(&mut self, text: &str) {
        self.thinking_text.push_str(text);
    }

    pub fn start_tool(&mut self, id: &str, name: &str) {
        self.tool_invocations
            .push(ToolInvocation::new(id, name, ToolStatus::Preparing));
        self.segments.push(Segment::Tool {
            tool_call_id: id.to_string(),
        });
    }

    /// Move a prepared call to `calling`, or record it directly in that
    /// state when no start was seen.
    pub fn call_tool(&mut self, id: &str, name: &str, arguments: Option<serde_json::Value>) {
        if let Some(existing) = self.tool_invocations.iter_mut().find(|t| t.id == id) {
            existing.arguments = arguments;
            existing.status = ToolStatus::Calling;
            if existing.name.is_empty() {
                existing.name = name.to_string();
            }
            return;
        }
        let mut call = ToolInvocation::new(id, name, ToolStatus::Calling);
        call.arguments = arguments;
        self.tool_invocations.push(call);
        self.segments.push(Segment::Tool {
            tool_call_id: id.to_string(),
        });
    }

    /// Record a tool outcome. Returns false when the id is unknown.
    pub fn finish_tool(
        &mut self,
        id: &str,
        status: ToolStatus,
        result: Option<String>,
        duration_ms: Option<u64>,
    ) -> bool {
        let Some(call) = self.tool_invocations.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        call.status = status;
        call.result = result;
        if duration_ms.is_some() {
            call.duration_ms = duration_ms;
        }
        true
    }

    pub fn tool(&self, id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations.iter().find(|t| t.id == id)
    }

    /// Whether there is anything worth persisting as a message.
    pub fn has_output(&self) -> bool {
        !self.content_text.is_empty() || !self.tool_invocations.is_empty()
    }

    /// Label shown on the finalized message: the sender, else the model.
    pub fn display_label(&self) -> &str {
        if self.sender_label.is_empty() {
            &self.model_name
        } else {
            &self.sender_label
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskStreamState>,
    next_seq: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns false, leaving the entry untouched, if the
    /// id is already known.
    pub fn start(&mut self, task_id: &TaskId, model: &str, sender_label: &str) -> bool {
        if self.tasks.contains_key(task_id) {
            return false;
        }
        self.insert(task_id, model, sender_label);
        true
    }

    /// Fetch the accumulator, creating it on first sight of the id.
    pub fn get_or_create(
        &mut self,
        task_id: &TaskId,
        model: &str,
        sender_label: &str,
    ) -> &mut TaskStreamState {
        let next_seq = &mut self.next_seq;
        self.tasks.entry(task_id.clone()).or_insert_with(|| {
            tracing::debug!(task_id = %task_id, "task seen without start event");
            let seq = *next_seq;
            *next_seq += 1;
            TaskStreamState::new(task_id.clone(), model, sender_label, seq)
        })
    }

    fn insert(&mut self, task_id: &TaskId, model: &str, sender_label: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            task_id.clone(),
            TaskStreamState::new(task_id.clone(), model, sender_label, seq),
        );
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskStreamState> {
        self.tasks.get(task_id)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Take a task out of the registry by value.
    pub fn remove(&mut self, task_id: &TaskId) -> Option<TaskStreamState> {
        self.tasks.remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskStreamState> {
        self.tasks.get(task_id).cloned()
    }

    /// Copies of all tasks, oldest first.
    pub fn snapshots(&self) -> Vec<TaskStreamState> {
        let mut all: Vec<TaskStreamState> = self.tasks.values().cloned().collect();
        all.sort_by_key(|t| t.started_seq);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::from(s)
    }

    #[test]
    fn start_is_idempotent() {
        let mut reg = TaskRegistry::new();
        assert!(reg.start(&id("1"), "m", "Analyst"));
        reg.get_or_create(&id("1"), "", "").append_content("abc");
        assert!(!reg.start(&id("1"), "other", "Someone"));

        let t = reg.get(&id("1")).unwrap();
        assert_eq!(t.content_text, "abc");
        assert_eq!(t.model_name, "m");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn content_segments_merge_until_a_tool_interrupts() {
        let mut t = TaskStreamState::new(id("1"), "m", "", 0);
        t.append_content("Hel");
        t.append_content("lo");
        t.start_tool("c1", "search");
        t.append_content("Done");
        t.append_content("!");

        assert_eq!(t.content_text, "HelloDone!");
        assert_eq!(
            t.segments,
            vec![
                Segment::Content {
                    text: "Hello".into()
                },
                Segment::Tool {
                    tool_call_id: "c1".into()
                },
                Segment::Content {
                    text: "Done!".into()
                },
            ]
        );
    }

    #[test]
    fn tool_lifecycle() {
        let mut t = TaskStreamState::new(id("1"), "m", "", 0);
        t.start_tool("c1", "search");
        assert_eq!(t.tool("c1").unwrap().status, ToolStatus::Preparing);

        t.call_tool("c1", "search", Some(serde_json::json!({"q": "eur"})));
        assert_eq!(t.tool("c1").unwrap().status, ToolStatus::Calling);
        assert_eq!(t.segments.len(), 1);

        assert!(t.finish_tool("c1", ToolStatus::Done, Some("ok".into()), Some(40)));
        let call = t.tool("c1").unwrap();
        assert_eq!(call.status, ToolStatus::Done);
        assert_eq!(call.result.as_deref(), Some("ok"));
        assert_eq!(call.duration_ms, Some(40));

        assert!(!t.finish_tool("nope", ToolStatus::Error, None, None));
    }

    #[test]
    fn call_without_start_creates_calling_entry() {
        let mut t = TaskStreamState::new(id("1"), "m", "", 0);
        t.call_tool("c9", "fetch", None);
        assert_eq!(t.tool("c9").unwrap().status, ToolStatus::Calling);
        assert_eq!(t.segments.len(), 1);
        assert!(t.has_output());
    }

    #[test]
    fn snapshots_are_ordered_copies() {
        let mut reg = TaskRegistry::new();
        reg.start(&id("b"), "m", "");
        reg.get_or_create(&id("a"), "m", "");
        reg.get_or_create(&id("b"), "", "").append_content("x");

        let snaps = reg.snapshots();
        let order: Vec<&str> = snaps.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);

        let mut copy = reg.snapshot(&id("b")).unwrap();
        copy.append_content("y");
        assert_eq!(reg.get(&id("b")).unwrap().content_text, "x");
    }

    #[test]
    fn display_label_falls_back_to_model() {
        let t = TaskStreamState::new(id("1"), "gpt-4o", "", 0);
        assert_eq!(t.display_label(), "gpt-4o");
        let t = TaskStreamState::new(id("1"), "gpt-4o", "Analyst", 0);
        assert_eq!(t.display_label(), "Analyst");
    }
}
