use serde::{Deserialize, Serialize};
use std::fmt;

/// A position inside a [`SourceFileSet`]. `Pos::NONE` means "unknown".
///
/// Positions are global to a file set: each file owns the range
/// `base..=base + size`, so a bare `Pos` is enough to find both the file and
/// the offset inside it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Pos(pub usize);

impl Pos {
    pub const NONE: Pos = Pos(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// A resolved position: file name plus 1-based line and column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilePos {
    pub filename: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceFilePos {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceFilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return if self.filename.is_empty() {
                write!(f, "-")
            } else {
                write!(f, "{}", self.filename)
            };
        }
        if self.filename.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub base: usize,
    pub size: usize,
    /// Byte offset of the first character of each line.
    lines: Vec<usize>,
}

impl SourceFile {
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Record the start of a new line. Offsets must be increasing and
    /// inside the file; anything else is ignored.
    pub fn add_line(&mut self, offset: usize) {
        let last = self.lines.last().copied().unwrap_or(0);
        if (self.lines.is_empty() || offset > last) && offset < self.size {
            self.lines.push(offset);
        }
    }

    /// Compute line starts from the file content.
    pub fn set_lines_for_content(&mut self, content: &str) {
        self.lines.clear();
        self.lines.push(0);
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                self.add_line(i + 1);
            }
        }
    }

    pub fn pos(&self, offset: usize) -> Pos {
        Pos(self.base + offset.min(self.size))
    }

    pub fn offset(&self, pos: Pos) -> usize {
        pos.0.saturating_sub(self.base)
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.0 >= self.base && pos.0 <= self.base + self.size
    }

    pub fn position(&self, pos: Pos) -> SourceFilePos {
        if !pos.is_valid() || !self.contains(pos) {
            return SourceFilePos {
                filename: self.name.clone(),
                ..SourceFilePos::default()
            };
        }
        let offset = self.offset(pos);
        let line_idx = match self.lines.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.lines.get(line_idx).copied().unwrap_or(0);
        SourceFilePos {
            filename: self.name.clone(),
            offset,
            line: line_idx + 1,
            column: offset - line_start + 1,
        }
    }
}

/// The set of source files a program was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileSet {
    base: usize,
    files: Vec<SourceFile>,
}

impl Default for SourceFileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFileSet {
    pub fn new() -> Self {
        Self {
            base: 1,
            files: Vec::new(),
        }
    }

    /// Register a file of `size` bytes and return it so the caller can set
    /// its line table. The file starts at the next free base.
    pub fn add_file(&mut self, name: impl Into<String>, size: usize) -> &mut SourceFile {
        let base = self.base;
        self.base += size + 1;
        self.files.push(SourceFile {
            name: name.into(),
            base,
            size,
            lines: vec![0],
        });
        let idx = self.files.len() - 1;
        &mut self.files[idx]
    }

    /// Register a file and compute its lines from `content` in one go.
    pub fn add_source(&mut self, name: impl Into<String>, content: &str) -> &SourceFile {
        let file = self.add_file(name, content.len());
        file.set_lines_for_content(content);
        file
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file(&self, pos: Pos) -> Option<&SourceFile> {
        if !pos.is_valid() {
            return None;
        }
        self.files.iter().rev().find(|f| f.contains(pos))
    }

    pub fn position(&self, pos: Pos) -> SourceFilePos {
        match self.file(pos) {
            Some(file) => file.position(pos),
            None => SourceFilePos::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_line_and_column() {
        let mut set = SourceFileSet::new();
        let src = "a := 1\nb := 2\n  c";
        let file = set.add_source("test", src);
        let pos = file.pos(8);
        assert_eq!(set.position(pos).to_string(), "test:2:2");
        let pos = set.files()[0].pos(16);
        assert_eq!(set.position(pos).to_string(), "test:3:3");
    }

    #[test]
    fn test_files_do_not_overlap() {
        let mut set = SourceFileSet::new();
        let a = set.add_source("a", "xx").pos(1);
        let b = set.add_source("b", "yy").pos(0);
        assert_eq!(set.file(a).map(|f| f.name.as_str()), Some("a"));
        assert_eq!(set.file(b).map(|f| f.name.as_str()), Some("b"));
    }

    #[test]
    fn test_invalid_position_renders_dash() {
        let set = SourceFileSet::new();
        assert_eq!(set.position(Pos::NONE).to_string(), "-");
    }
}
