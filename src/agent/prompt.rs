//! Prompt rendering and agent-output parsing.
//!
//! Prompts are rendered from a template with two placeholders: `{{task}}`
//! (the composed task block) and `{{context}}` (the step args as pretty
//! JSON). Agent output is free text that should contain a JSON value
//! somewhere; we take the first parseable one.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::domain::TaskDescriptor;

/// Template used when no prompt template is configured
pub const DEFAULT_TEMPLATE: &str = "\
{{task}}

Input context:
{{context}}

Respond with a single JSON object matching the expected output fields.
";

/// Render the prompt for one task invocation
pub fn render_prompt(template: &str, descriptor: &TaskDescriptor, args: &Value) -> String {
    let task_block = compose_task_block(descriptor);
    let context = serde_json::to_string_pretty(args).unwrap_or_else(|_| "{}".to_string());

    template
        .replace("{{task}}", &task_block)
        .replace("{{context}}", &context)
}

/// Compose the task block from a descriptor's prompt fields
fn compose_task_block(descriptor: &TaskDescriptor) -> String {
    let mut block = String::new();

    block.push_str(&format!("# {}\n\n", descriptor.title));
    block.push_str(&format!("Role: {}\n", descriptor.agent.role));
    block.push_str(&format!("Task: {}\n", descriptor.agent.task));

    if !descriptor.agent.instructions.is_empty() {
        block.push_str("\nInstructions:\n");
        for (i, instruction) in descriptor.agent.instructions.iter().enumerate() {
            block.push_str(&format!("{}. {}\n", i + 1, instruction));
        }
    }

    if let Some(format) = &descriptor.agent.output_format {
        block.push_str(&format!("\nOutput format: {}\n", format));
    }

    if !descriptor.output_schema.is_null() {
        if let Ok(schema) = serde_json::to_string_pretty(&descriptor.output_schema) {
            block.push_str(&format!("\nExpected output schema:\n{}\n", schema));
        }
    }

    block
}

/// Extract the first parseable JSON object or array from free text.
///
/// Agents wrap their JSON in prose, markdown fences, or byte-order marks;
/// scan for the first position where a JSON value actually parses.
pub fn extract_first_json(text: &str) -> Result<Value> {
    let text = text.trim_start_matches('\u{feff}');

    for (offset, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }

        let mut stream = serde_json::Deserializer::from_str(&text[offset..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() || value.is_array() {
                return Ok(value);
            }
        }
    }

    anyhow::bail!("No JSON object/array found in agent output")
}

/// Parse agent stdout into a result object
pub fn parse_agent_output(stdout: &str) -> Result<Value> {
    extract_first_json(stdout).context("Agent output did not contain a JSON result")
}
