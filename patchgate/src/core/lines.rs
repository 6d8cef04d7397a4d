//! Line-addressed text edits.
//!
//! Files are split on line terminators (`\n` or `\r\n`); a trailing terminator
//! does not produce an extra empty line. Line numbers are 1-based and ranges
//! are inclusive. The result is re-joined with `\n`, keeping a trailing newline
//! when the source had one and the result is non-empty.

use crate::core::plan::OpKind;

/// A line edit addressed lines that do not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("startLine {start_line} is out of range (file has {len} lines)")]
    StartOutOfRange { start_line: usize, len: usize },

    #[error("endLine {end_line} is out of range (file has {len} lines)")]
    EndOutOfRange { end_line: usize, len: usize },

    #[error("endLine {end_line} < startLine {start_line}")]
    InvertedRange { start_line: usize, end_line: usize },

    #[error("{kind} is not a line-based operation")]
    NotLineBased { kind: &'static str },
}

/// A file body held as lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl LineBuffer {
    pub fn parse(source: &str) -> Self {
        Self {
            lines: split_lines(source),
            trailing_newline: source.ends_with('\n'),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Insert `content` immediately after line `start_line`.
    pub fn insert_after(&mut self, start_line: usize, content: &str) -> Result<(), LineError> {
        let index = self.start_index(start_line)?;
        if start_line > self.lines.len() {
            return Err(LineError::StartOutOfRange {
                start_line,
                len: self.lines.len(),
            });
        }
        let at = index + 1;
        self.lines.splice(at..at, split_lines(content));
        Ok(())
    }

    /// Replace lines `start_line..=end_line` with `content`.
    pub fn replace_range(
        &mut self,
        start_line: usize,
        end_line: usize,
        content: &str,
    ) -> Result<(), LineError> {
        let (start, end) = self.range_indices(start_line, end_line)?;
        self.lines.splice(start..=end, split_lines(content));
        Ok(())
    }

    /// Remove lines `start_line..=end_line`.
    pub fn delete_range(&mut self, start_line: usize, end_line: usize) -> Result<(), LineError> {
        let (start, end) = self.range_indices(start_line, end_line)?;
        self.lines.drain(start..=end);
        Ok(())
    }

    fn start_index(&self, start_line: usize) -> Result<usize, LineError> {
        start_line
            .checked_sub(1)
            .ok_or(LineError::StartOutOfRange {
                start_line,
                len: self.lines.len(),
            })
    }

    fn range_indices(&self, start_line: usize, end_line: usize) -> Result<(usize, usize), LineError> {
        let start = self.start_index(start_line)?;
        if end_line < start_line {
            return Err(LineError::InvertedRange {
                start_line,
                end_line,
            });
        }
        if start >= self.lines.len() {
            return Err(LineError::StartOutOfRange {
                start_line,
                len: self.lines.len(),
            });
        }
        if end_line > self.lines.len() {
            return Err(LineError::EndOutOfRange {
                end_line,
                len: self.lines.len(),
            });
        }
        Ok((start, end_line - 1))
    }
}

/// Split text into lines without terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Apply a line-based operation to `source`, returning the new body.
pub fn apply_line_op(source: &str, kind: &OpKind) -> Result<String, LineError> {
    let mut buffer = LineBuffer::parse(source);
    match kind {
        OpKind::InsertAfter {
            start_line,
            content,
        } => buffer.insert_after(*start_line, content)?,
        OpKind::ReplaceRange {
            start_line,
            end_line,
            content,
        } => buffer.replace_range(*start_line, *end_line, content)?,
        OpKind::DeleteRange {
            start_line,
            end_line,
        } => buffer.delete_range(*start_line, *end_line)?,
        OpKind::CreateFile { .. } | OpKind::UpdateFile { .. } => {
            return Err(LineError::NotLineBased { kind: kind.name() });
        }
    }
    Ok(buffer.render())
}
