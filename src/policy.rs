/// Keywords and punctuation identifiers the parser dispatches on.
///
/// These double as the reserved-word list: none of them may be declared as a
/// function, variable, struct, enum, or constant name.
pub const KEYWORDS: &[&str] = &[
    "func", "inline", "raw", "begin", "end", "include", "asm", "if", "then", "elseif", "else",
    "while", "do", "let", "array", "enable", "requires", "struct", "version", "not", "const",
    "enum", "restrict", "union", "alias", "overwrite", "extern", "C", "implement", "return",
    "break", "continue", "->",
];

/// Intrinsic and primitive type names that are likewise off-limits as user identifiers.
pub const RESERVED_TYPE_NAMES: &[&str] = &[
    "u8", "i8", "u16", "i16", "addr", "size", "usize", "cell", "Array",
];

/// True if `name` may not be used as a function, variable, struct, enum, const, or alias name.
pub fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(&name) || RESERVED_TYPE_NAMES.contains(&name)
}

/// Feature tags a backend may declare support for, consulted by `version`/`enable`/`requires`/`restrict`.
pub const STANDARD_FEATURE_TAGS: &[&str] = &["IO", "16Bit", "BigEndian", "ZeroPage"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_reserved() {
        assert!(is_reserved("if"));
        assert!(is_reserved("u16"));
        assert!(!is_reserved("counter"));
    }
}
