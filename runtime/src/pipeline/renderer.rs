use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;
use ts_rs::TS;

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DiagramFormat {
    /// The validated nomnoml source itself.
    Nomnoml,
    Svg,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct RenderedDiagram {
    pub format: DiagramFormat,
    pub body: String,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Turns a diagram description into something drawable.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, description: &str) -> Result<RenderedDiagram, RenderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NomnomlValidator;

#[async_trait]
impl DiagramRenderer for NomnomlValidator {
    async fn render(&self, description: &str) -> Result<RenderedDiagram, RenderError> {
        let (node_count, edge_count) = validate(description)?;
        Ok(RenderedDiagram {
            format: DiagramFormat::Nomnoml,
            body: description.to_string(),
            node_count,
            edge_count,
        })
    }
}

/// Pipes the description to an external program (for instance a nomnoml CLI wrapper)
/// and takes its stdout as SVG.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl DiagramRenderer for CommandRenderer {
    async fn render(&self, description: &str) -> Result<RenderedDiagram, RenderError> {
        let (node_count, edge_count) = validate(description)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RenderError::new(format!("failed to start {}: {err}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(description.as_bytes())
                .await
                .map_err(|err| RenderError::new(format!("failed to write diagram: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| RenderError::new(format!("renderer did not finish: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::new(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let body = String::from_utf8(output.stdout)
            .map_err(|_| RenderError::new("renderer produced non UTF-8 output"))?;
        debug!(bytes = body.len(), "diagram rendered");

        Ok(RenderedDiagram {
            format: DiagramFormat::Svg,
            body,
            node_count,
            edge_count,
        })
    }
}

/// Checks every statement line for balanced node brackets. Returns the number of
/// declarations and edges.
fn validate(description: &str) -> Result<(usize, usize), RenderError> {
    let mut nodes = 0usize;
    let mut edges = 0usize;

    for (idx, line) in description.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        let mut depth = 0i32;
        let mut top_level = 0usize;
        let mut label_len = 0usize;
        let mut escaped = false;

        for ch in trimmed.chars() {
            if escaped {
                escaped = false;
                label_len += 1;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '[' => {
                    if depth == 0 {
                        top_level += 1;
                        label_len = 0;
                    }
                    depth += 1;
                }
                ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(RenderError::at_line("unexpected `]`", line_no));
                    }
                    if depth == 0 && label_len == 0 {
                        return Err(RenderError::at_line("empty node", line_no));
                    }
                }
                _ => {
                    if depth > 0 {
                        label_len += 1;
                    }
                }
            }
        }

        if depth != 0 || escaped {
            return Err(RenderError::at_line("unterminated node", line_no));
        }
        match top_level {
            0 => return Err(RenderError::at_line("statement without a node", line_no)),
            1 => nodes += 1,
            _ => edges += top_level - 1,
        }
    }

    Ok((nodes, edges))
}
