//! Typed representation of a recorded agent interaction.
//!
//! A [`Thread`] is an ordered list of [`Message`]s. Every `tool_result`
//! block must answer exactly one preceding `tool_call` block; this is
//! checked once at construction, after which the thread is read-only.
//!
//! Raw input is accepted in the shapes agent evaluation datasets use:
//! a bare message array, `{ "messages": [...] }`, or a dataset item
//! `{ "query": ..., "response": ..., "tool_definitions": [...] }`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::MalformedThreadError;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Closed set of message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Parse a raw role string. Case-sensitive, like the wire format.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured request emitted by the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The response bound to a [`ToolCall`] by its identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub payload: Value,
}

/// One content block within a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A single message in a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Groups the messages of one multi-step agent turn.
    pub run_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            run_id: None,
            created_at: None,
        }
    }

    /// A message holding a single text block.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::Text { text: text.into() }])
    }

    /// An assistant message holding a single tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(
            Role::Assistant,
            vec![ContentBlock::ToolCall(ToolCall {
                tool_call_id: id.into(),
                name: name.into(),
                arguments,
            })],
        )
    }

    /// A tool message answering `id` with `payload`.
    pub fn tool_result(id: impl Into<String>, payload: Value) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentBlock::ToolResult(ToolResult {
                tool_call_id: id.into(),
                payload,
            })],
        )
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

/// A tool the agent was offered, as declared alongside the thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// Where a tool call lives inside a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallLocation {
    message_index: usize,
    block_index: usize,
}

/// One complete, validated agent interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    messages: Vec<Message>,
    tool_definitions: Vec<ToolDefinition>,
    #[serde(skip)]
    call_index: HashMap<String, CallLocation>,
}

/// A tool call together with its position in the thread.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallRef<'a> {
    /// Index of the message carrying the call.
    pub message_index: usize,
    /// Index of the call among that message's content blocks.
    pub block_index: usize,
    /// Ordinal of the call among all tool calls in the thread.
    pub ordinal: usize,
    pub call: &'a ToolCall,
}

/// A tool result together with the name of the tool that produced it.
#[derive(Debug, Clone, Copy)]
pub struct ToolResultRef<'a> {
    pub message_index: usize,
    pub tool_name: &'a str,
    pub result: &'a ToolResult,
}

impl Thread {
    /// Build a thread from typed messages, enforcing the pairing invariant.
    pub fn new(
        messages: Vec<Message>,
        tool_definitions: Vec<ToolDefinition>,
    ) -> Result<Self, MalformedThreadError> {
        let mut call_index = HashMap::new();

        for (index, message) in messages.iter().enumerate() {
            for (block, content) in message.content.iter().enumerate() {
                match content {
                    ContentBlock::ToolCall(call) => {
                        if call.name.trim().is_empty() {
                            return Err(MalformedThreadError::MissingToolName { index, block });
                        }
                        if call.tool_call_id.is_empty() {
                            return Err(MalformedThreadError::MissingToolCallId { index, block });
                        }
                        let location = CallLocation {
                            message_index: index,
                            block_index: block,
                        };
                        if call_index
                            .insert(call.tool_call_id.clone(), location)
                            .is_some()
                        {
                            return Err(MalformedThreadError::DuplicateToolCallId {
                                index,
                                block,
                                tool_call_id: call.tool_call_id.clone(),
                            });
                        }
                    }
                    ContentBlock::ToolResult(result) => {
                        if !call_index.contains_key(&result.tool_call_id) {
                            return Err(MalformedThreadError::UnknownToolCallId {
                                index,
                                block,
                                tool_call_id: result.tool_call_id.clone(),
                            });
                        }
                    }
                    ContentBlock::Text { .. } => {}
                }
            }
        }

        Ok(Self {
            messages,
            tool_definitions,
            call_index,
        })
    }

    /// Parse raw structured input into a validated thread.
    pub fn from_value(value: &Value) -> Result<Self, MalformedThreadError> {
        let (messages, definitions) = parse_input(value)?;
        Self::new(messages, definitions)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.tool_definitions
    }

    /// Messages `0..=index`. An index past the end yields the whole thread.
    pub fn prefix(&self, index: usize) -> ThreadPrefix<'_> {
        ThreadPrefix {
            thread: self,
            end: index.saturating_add(1).min(self.messages.len()),
            last_blocks: usize::MAX,
        }
    }

    /// Everything up to and including the block holding `target`.
    ///
    /// Blocks after the call in the same message are excluded.
    pub fn prefix_through(&self, target: &ToolCallRef<'_>) -> ThreadPrefix<'_> {
        let mut prefix = self.prefix(target.message_index);
        if prefix.end == target.message_index + 1 {
            prefix.last_blocks = target.block_index + 1;
        }
        prefix
    }

    /// The whole thread as a prefix.
    pub fn full(&self) -> ThreadPrefix<'_> {
        ThreadPrefix {
            thread: self,
            end: self.messages.len(),
            last_blocks: usize::MAX,
        }
    }

    /// All tool calls in thread order.
    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCallRef<'_>> {
        self.full().tool_calls()
    }

    pub fn call_by_id(&self, tool_call_id: &str) -> Option<&ToolCall> {
        let loc = self.call_index.get(tool_call_id)?;
        match self.messages.get(loc.message_index)?.content.get(loc.block_index)? {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Read-only view of the first `end` messages of a thread.
///
/// Extractors compute "facts known so far" over a prefix. Only the first
/// `last_blocks` content blocks of the final message are visible to
/// `tool_calls` and `tool_results`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPrefix<'a> {
    thread: &'a Thread,
    end: usize,
    last_blocks: usize,
}

impl<'a> ThreadPrefix<'a> {
    pub fn thread(&self) -> &'a Thread {
        self.thread
    }

    pub fn messages(&self) -> &'a [Message] {
        &self.thread.messages[..self.end]
    }

    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Content blocks visible in the prefix, with their positions.
    fn blocks(&self) -> impl Iterator<Item = (usize, usize, &'a ContentBlock)> {
        let last = self.end.saturating_sub(1);
        let last_blocks = self.last_blocks;
        self.messages()
            .iter()
            .enumerate()
            .flat_map(move |(message_index, message)| {
                let visible = if message_index == last {
                    last_blocks.min(message.content.len())
                } else {
                    message.content.len()
                };
                message.content[..visible]
                    .iter()
                    .enumerate()
                    .map(move |(block_index, block)| (message_index, block_index, block))
            })
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCallRef<'a>> {
        self.blocks()
            .filter_map(|(message_index, block_index, block)| match block {
                ContentBlock::ToolCall(call) => Some((message_index, block_index, call)),
                _ => None,
            })
            .enumerate()
            .map(|(ordinal, (message_index, block_index, call))| ToolCallRef {
                message_index,
                block_index,
                ordinal,
                call,
            })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = ToolResultRef<'a>> {
        let thread = self.thread;
        self.blocks()
            .filter_map(move |(message_index, _, block)| match block {
                ContentBlock::ToolResult(result) => thread
                    .call_by_id(&result.tool_call_id)
                    .map(|call| ToolResultRef {
                        message_index,
                        tool_name: call.name.as_str(),
                        result,
                    }),
                _ => None,
            })
    }
}

// ---------------------------------------------------------------------------
// Raw input parsing
// ---------------------------------------------------------------------------

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_input(
    value: &Value,
) -> Result<(Vec<Message>, Vec<ToolDefinition>), MalformedThreadError> {
    match value {
        Value::Array(items) => Ok((parse_message_list(items, 0)?, Vec::new())),
        Value::Object(obj) => {
            let definitions = match obj.get("tool_definitions") {
                Some(defs) => parse_tool_definitions(defs)?,
                None => Vec::new(),
            };

            if let Some(messages) = obj.get("messages") {
                let items = messages
                    .as_array()
                    .ok_or_else(|| MalformedThreadError::InvalidShape {
                        found: format!("messages as {}", kind_name(messages)),
                    })?;
                return Ok((parse_message_list(items, 0)?, definitions));
            }

            if obj.contains_key("query") || obj.contains_key("response") {
                let mut messages = Vec::new();
                if let Some(query) = obj.get("query") {
                    messages.extend(parse_item_part(query, Role::User, 0)?);
                }
                if let Some(response) = obj.get("response") {
                    let offset = messages.len();
                    messages.extend(parse_item_part(response, Role::Assistant, offset)?);
                }
                return Ok((messages, definitions));
            }

            Err(MalformedThreadError::InvalidShape {
                found: "object without messages, query or response".to_string(),
            })
        }
        other => Err(MalformedThreadError::InvalidShape {
            found: kind_name(other).to_string(),
        }),
    }
}

/// A `query` / `response` part: a plain string or a message array.
fn parse_item_part(
    value: &Value,
    text_role: Role,
    offset: usize,
) -> Result<Vec<Message>, MalformedThreadError> {
    match value {
        Value::String(text) => Ok(vec![Message::text(text_role, text.clone())]),
        Value::Array(items) => parse_message_list(items, offset),
        Value::Null => Ok(Vec::new()),
        other => Err(MalformedThreadError::InvalidShape {
            found: format!("item part as {}", kind_name(other)),
        }),
    }
}

fn parse_message_list(items: &[Value], offset: usize) -> Result<Vec<Message>, MalformedThreadError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_message(offset + i, item))
        .collect()
}

fn parse_message(index: usize, value: &Value) -> Result<Message, MalformedThreadError> {
    let obj = value
        .as_object()
        .ok_or(MalformedThreadError::MessageNotObject { index })?;

    let role = match obj.get("role") {
        None | Some(Value::Null) => return Err(MalformedThreadError::MissingRole { index }),
        Some(Value::String(raw)) => {
            Role::parse(raw).ok_or_else(|| MalformedThreadError::UnknownRole {
                index,
                role: raw.clone(),
            })?
        }
        Some(other) => {
            return Err(MalformedThreadError::UnknownRole {
                index,
                role: other.to_string(),
            })
        }
    };

    let message_call_id = obj.get("tool_call_id").and_then(Value::as_str);

    let content = match obj.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .enumerate()
            .map(|(block, raw)| parse_block(index, block, raw, message_call_id))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(MalformedThreadError::InvalidContent { index }),
    };

    let run_id = obj
        .get("run_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let created_at = match obj.get("createdAt").or_else(|| obj.get("created_at")) {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| MalformedThreadError::InvalidTimestamp {
                    index,
                    value: raw.clone(),
                })?
                .with_timezone(&Utc),
        ),
        Some(other) => {
            return Err(MalformedThreadError::InvalidTimestamp {
                index,
                value: other.to_string(),
            })
        }
    };

    Ok(Message {
        role,
        content,
        run_id,
        created_at,
    })
}

fn parse_block(
    index: usize,
    block: usize,
    value: &Value,
    message_call_id: Option<&str>,
) -> Result<ContentBlock, MalformedThreadError> {
    let obj = match value {
        Value::String(text) => return Ok(ContentBlock::Text { text: text.clone() }),
        Value::Object(obj) => obj,
        other => {
            return Err(MalformedThreadError::UnknownBlockType {
                index,
                block,
                kind: kind_name(other).to_string(),
            })
        }
    };

    let kind = obj.get("type").and_then(Value::as_str).unwrap_or("<missing>");
    match kind {
        "text" => Ok(ContentBlock::Text {
            text: obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "tool_call" => {
            let tool_call_id = obj
                .get("tool_call_id")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or(MalformedThreadError::MissingToolCallId { index, block })?
                .to_string();
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
                .ok_or(MalformedThreadError::MissingToolName { index, block })?
                .to_string();
            let arguments = parse_arguments(index, block, obj.get("arguments"))?;
            Ok(ContentBlock::ToolCall(ToolCall {
                tool_call_id,
                name,
                arguments,
            }))
        }
        "tool_result" => {
            let tool_call_id = obj
                .get("tool_call_id")
                .and_then(Value::as_str)
                .or(message_call_id)
                .filter(|id| !id.is_empty())
                .ok_or(MalformedThreadError::MissingToolCallId { index, block })?
                .to_string();
            let payload = obj
                .get("tool_result")
                .or_else(|| obj.get("content"))
                .or_else(|| obj.get("result"))
                .cloned()
                .unwrap_or(Value::Null);
            Ok(ContentBlock::ToolResult(ToolResult {
                tool_call_id,
                payload,
            }))
        }
        other => Err(MalformedThreadError::UnknownBlockType {
            index,
            block,
            kind: other.to_string(),
        }),
    }
}

/// Arguments arrive as an object, nothing, or a JSON-encoded object string.
fn parse_arguments(
    index: usize,
    block: usize,
    raw: Option<&Value>,
) -> Result<Map<String, Value>, MalformedThreadError> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(MalformedThreadError::InvalidArguments { index, block }),
        },
        Some(_) => Err(MalformedThreadError::InvalidArguments { index, block }),
    }
}

fn parse_tool_definitions(value: &Value) -> Result<Vec<ToolDefinition>, MalformedThreadError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => std::slice::from_ref(value),
        other => {
            return Err(MalformedThreadError::InvalidToolDefinition {
                index: 0,
                detail: format!("expected array, got {}", kind_name(other)),
            })
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            // OpenAI-style wrappers nest the definition under "function".
            let body = item.get("function").unwrap_or(item);
            serde_json::from_value::<ToolDefinition>(body.clone()).map_err(|e| {
                MalformedThreadError::InvalidToolDefinition {
                    index,
                    detail: e.to_string(),
                }
            })
        })
        .collect()
}
