//! CLI output formatting

use crate::core::config::{ChannelConfig, PipelineDefinition, StepDefinition};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");

/// One line per step: index, name, type and handler
pub fn format_step(index: usize, step: &StepDefinition) -> String {
    let mut line = format!(
        "{}. {} ({} via {})",
        index + 1,
        style(step.step_name()).cyan(),
        step.step_type.to_ascii_lowercase(),
        style(&step.handler).dim()
    );
    if let Some(timeout_ms) = step.timeout_ms {
        line.push_str(&format!(" timeout {}ms", timeout_ms));
    }
    line
}

/// Header line plus one line per step
pub fn format_pipeline(pipeline: &PipelineDefinition) -> Vec<String> {
    let tenant = pipeline
        .tenant_id
        .as_deref()
        .map(|t| format!(" tenant {}", style(t).yellow()))
        .unwrap_or_default();

    let mut lines = vec![format!(
        "{}{} - {} steps",
        style(&pipeline.name).bold(),
        tenant,
        pipeline.steps.len()
    )];
    lines.extend(
        pipeline
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("    {}", format_step(i, step))),
    );
    lines
}

/// Channel defaults followed by overrides sorted by name
pub fn format_channels(channels: &ChannelConfig) -> Vec<String> {
    let mut lines = vec![format!(
        "default: max_queue_size {}, call_timeout {}ms",
        style(channels.max_queue_size).cyan(),
        channels.call_timeout_ms
    )];

    let mut names: Vec<&String> = channels.overrides.keys().collect();
    names.sort();
    for name in names {
        let resolved = channels.for_channel(name);
        lines.push(format!(
            "{}: max_queue_size {}, call_timeout {}ms",
            style(name).bold(),
            style(resolved.max_queue_size).cyan(),
            resolved.call_timeout_ms
        ));
    }
    lines
}
