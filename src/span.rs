use once_cell::unsync::OnceCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// The line and column of a byte offset inside a [Code] buffer.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A source file wrapped for byte-offset to line/column resolution.
///
/// Line breaks are indexed lazily on first lookup, mirroring the `lang_pt::Code`
/// approach of caching a sorted break-point table rather than walking the whole
/// buffer on every diagnostic.
pub struct Code<'c> {
    pub name: Rc<str>,
    pub value: &'c [u8],
    line_breaks: OnceCell<Vec<usize>>,
}

impl<'c> Code<'c> {
    pub fn new(name: impl Into<Rc<str>>, value: &'c [u8]) -> Self {
        Self {
            name: name.into(),
            value,
            line_breaks: OnceCell::new(),
        }
    }

    fn obtain_line_breaks(&self) -> &Vec<usize> {
        self.line_breaks.get_or_init(|| {
            self.value
                .iter()
                .enumerate()
                .filter_map(|(index, b)| if *b == b'\n' { Some(index) } else { None })
                .collect()
        })
    }

    pub fn obtain_position(&self, pointer: usize) -> Position {
        let line_breaks = self.obtain_line_breaks();
        let index = match line_breaks.binary_search(&pointer) {
            Ok(index) | Err(index) => index,
        };
        if index == 0 {
            let s = unsafe { std::str::from_utf8_unchecked(&self.value[..pointer]) };
            Position::new(1, s.chars().count() + 1)
        } else {
            let break_point = line_breaks[index - 1] + 1;
            let s = unsafe { std::str::from_utf8_unchecked(&self.value[break_point..pointer]) };
            Position::new(index + 1, s.chars().count() + 1)
        }
    }

    pub fn line_text(&self, line: usize) -> &str {
        let line_breaks = self.obtain_line_breaks();
        let start = if line <= 1 {
            0
        } else {
            line_breaks.get(line - 2).map_or(self.value.len(), |p| p + 1)
        };
        let end = line_breaks.get(line - 1).copied().unwrap_or(self.value.len());
        unsafe { std::str::from_utf8_unchecked(&self.value[start..end.max(start)]) }
    }
}

/// A source-span: the file it belongs to, its starting line/column, and its length in columns.
///
/// Spans never affect semantics; they exist purely so diagnostics can point at source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: Rc<str>,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(file: Rc<str>, position: Position, length: usize) -> Self {
        Self {
            file,
            line: position.line,
            column: position.column,
            length,
        }
    }

    pub fn at(code: &Code, start: usize, end: usize) -> Self {
        let position = code.obtain_position(start);
        Span::new(code.name.clone(), position, end.saturating_sub(start).max(1))
    }

    /// A placeholder span with no real source provenance, used when an error
    /// is raised from context that no longer carries the original node span.
    pub fn synthetic() -> Self {
        Self {
            file: Rc::from("<generated>"),
            line: 0,
            column: 0,
            length: 0,
        }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
