//! Incremental parser for assistant output.
//!
//! The model writes tool calls as XML-ish tags inline with prose:
//!
//! ```text
//! Let me look.<thinking>check the entry point</thinking>
//! <read-file><path>src/main.ts</path></read-file>
//! ```
//!
//! [`MessageParser::feed`] accepts arbitrary fragments of that text and
//! returns the [`StreamEvent`]s that became certain. A `<` starts a tag
//! candidate; the candidate keeps accumulating across chunk boundaries while
//! it can still become a known tag and is flushed back as literal text as
//! soon as it cannot.

use wright_core::ids::ToolCallId;
use wright_core::stream::{StreamEvent, ToolParams, ToolStatus};

/// Tool tags the parser recognises. `kb-search` is parsed but has no
/// executor, so it fails validation as an unknown tool.
pub const TOOL_NAMES: &[&str] = &[
    "read-file",
    "write-to-file",
    "apply-diff",
    "search-files",
    "list-files",
    "ask-followup-question",
    "delete-file",
    "rename-file",
    "add-dependency",
    "kb-search",
];

pub const PARAM_NAMES: &[&str] = &[
    "path",
    "content",
    "diff",
    "recursive",
    "regex",
    "file-pattern",
    "source",
    "destination",
    "name",
    "query",
    "question",
];

const THINKING: &str = "thinking";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TagKind {
    Tool(&'static str),
    Param(&'static str),
    Thinking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tag {
    kind: TagKind,
    closing: bool,
}

impl Tag {
    /// Classify a complete candidate such as `</path>`.
    fn parse(candidate: &str) -> Option<Self> {
        let body = candidate.strip_prefix('<')?.strip_suffix('>')?;
        let (closing, name) = match body.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        let kind = if name == THINKING {
            TagKind::Thinking
        } else if let Some(tool) = TOOL_NAMES.iter().copied().find(|t| *t == name) {
            TagKind::Tool(tool)
        } else if let Some(param) = PARAM_NAMES.iter().copied().find(|p| *p == name) {
            TagKind::Param(param)
        } else {
            return None;
        };
        Some(Self { kind, closing })
    }
}

/// Whether `candidate` (starting with `<`, no `>` yet) can still grow into a
/// known tag.
fn is_known_prefix(candidate: &str) -> bool {
    let body = candidate.strip_prefix('<').unwrap_or(candidate);
    let name = body.strip_prefix('/').unwrap_or(body);
    THINKING.starts_with(name)
        || TOOL_NAMES.iter().any(|t| t.starts_with(name))
        || PARAM_NAMES.iter().any(|p| p.starts_with(name))
}

struct OpenTool {
    name: &'static str,
    id: ToolCallId,
    params: ToolParams,
}

struct OpenParam {
    name: &'static str,
    value: String,
}

/// Streaming tag automaton. One instance per model response.
#[derive(Default)]
pub struct MessageParser {
    in_thinking: bool,
    tool: Option<OpenTool>,
    param: Option<OpenParam>,
    text: String,
    thinking: String,
    candidate: Option<String>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one fragment. Text and thinking buffered during the fragment
    /// are flushed before returning; an unresolved tag candidate is kept.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for ch in chunk.chars() {
            self.push_char(ch, &mut events);
        }
        self.flush(&mut events);
        events
    }

    /// End of stream. A pending candidate becomes literal text; an
    /// unterminated tool block is dropped. The parser is reset afterwards.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(candidate) = self.candidate.take() {
            self.push_literal(&candidate);
        }
        self.flush(&mut events);
        *self = Self::default();
        events
    }

    /// True while inside a tool block that has not been closed.
    pub fn in_tool(&self) -> bool {
        self.tool.is_some()
    }

    fn push_char(&mut self, ch: char, events: &mut Vec<StreamEvent>) {
        let Some(mut candidate) = self.candidate.take() else {
            if ch == '<' {
                self.candidate = Some(String::from('<'));
            } else {
                self.push_literal_char(ch);
            }
            return;
        };

        if ch == '<' {
            self.push_literal(&candidate);
            self.candidate = Some(String::from('<'));
            return;
        }

        candidate.push(ch);
        if ch == '>' {
            match self.recognise(&candidate) {
                Some(tag) => self.apply(tag, events),
                None => self.push_literal(&candidate),
            }
        } else if self.can_continue(&candidate) {
            self.candidate = Some(candidate);
        } else {
            self.push_literal(&candidate);
        }
    }

    fn can_continue(&self, candidate: &str) -> bool {
        match &self.param {
            Some(param) => format!("</{}>", param.name).starts_with(candidate),
            None => is_known_prefix(candidate),
        }
    }

    /// Resolve a complete candidate against the current context. Tags that
    /// make no sense where they appear are treated as text.
    fn recognise(&self, candidate: &str) -> Option<Tag> {
        let tag = Tag::parse(candidate)?;
        if let Some(param) = &self.param {
            return (tag.closing && tag.kind == TagKind::Param(param.name)).then_some(tag);
        }
        let valid = match (tag.kind, tag.closing) {
            (TagKind::Thinking, false) => self.tool.is_none() && !self.in_thinking,
            (TagKind::Thinking, true) => self.in_thinking,
            (TagKind::Tool(_), false) => self.tool.is_none() && !self.in_thinking,
            (TagKind::Tool(name), true) => self.tool.as_ref().is_some_and(|t| t.name == name),
            (TagKind::Param(_), false) => self.tool.is_some(),
            (TagKind::Param(_), true) => false,
        };
        valid.then_some(tag)
    }

    fn apply(&mut self, tag: Tag, events: &mut Vec<StreamEvent>) {
        match (tag.kind, tag.closing) {
            (TagKind::Thinking, closing) => {
                self.flush(events);
                self.in_thinking = !closing;
            }
            (TagKind::Tool(name), false) => {
                self.flush(events);
                let id = ToolCallId::new();
                events.push(StreamEvent::tool(name, id.clone(), ToolStatus::Started, None));
                self.tool = Some(OpenTool {
                    name,
                    id,
                    params: ToolParams::new(),
                });
            }
            (TagKind::Tool(_), true) => {
                if let Some(tool) = self.tool.take() {
                    events.push(StreamEvent::tool(
                        tool.name,
                        tool.id,
                        ToolStatus::Executing,
                        Some(tool.params),
                    ));
                }
            }
            (TagKind::Param(name), false) => {
                self.param = Some(OpenParam {
                    name,
                    value: String::new(),
                });
            }
            (TagKind::Param(_), true) => {
                let (Some(param), Some(tool)) = (self.param.take(), self.tool.as_mut()) else {
                    return;
                };
                tool.params
                    .insert(param.name.to_string(), param.value.trim().to_string());
                events.push(StreamEvent::tool(
                    tool.name,
                    tool.id.clone(),
                    ToolStatus::Partial,
                    Some(tool.params.clone()),
                ));
            }
        }
    }

    fn push_literal(&mut self, s: &str) {
        for ch in s.chars() {
            self.push_literal_char(ch);
        }
    }

    fn push_literal_char(&mut self, ch: char) {
        if let Some(param) = self.param.as_mut() {
            param.value.push(ch);
        } else if self.tool.is_some() {
            // Text between parameters of a tool block is not shown.
        } else if self.in_thinking {
            self.thinking.push(ch);
        } else {
            self.text.push(ch);
        }
    }

    fn flush(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.thinking.is_empty() {
            events.push(StreamEvent::thinking(std::mem::take(&mut self.thinking)));
        }
        if !self.text.is_empty() {
            events.push(StreamEvent::text(std::mem::take(&mut self.text)));
        }
    }
}
