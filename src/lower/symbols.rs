use crate::ast::AstNode;
use std::collections::HashMap;

/// A registered type: a primitive, a struct, an enum alias, a union, or an alias thereof.
#[derive(Debug, Clone)]
pub struct TypeRecord {
    pub name: String,
    pub size_bytes: u32,
    pub is_struct: bool,
    pub members: Vec<(String, u32)>,
    pub has_init: bool,
    pub has_deinit: bool,
}

impl TypeRecord {
    fn primitive(name: &str, size_bytes: u32) -> Self {
        Self {
            name: name.to_string(),
            size_bytes,
            is_struct: false,
            members: Vec::new(),
            has_init: false,
            has_deinit: false,
        }
    }
}

/// A compiled word: either a callable function (`raw`/mangled) or an inline macro
/// whose body is replayed at every call site.
#[derive(Debug, Clone)]
pub struct WordRecord {
    pub raw: bool,
    pub inline: bool,
    pub inline_body: Option<Vec<AstNode>>,
}

/// One local variable, addressed relative to the virtual stack pointer.
/// `offset == 0` is always the most recently allocated local.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: String,
    pub offset: u32,
    pub array: bool,
    pub array_size: u64,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct GlobalRecord {
    pub ty: String,
    pub array: bool,
    pub array_size: u64,
}

#[derive(Debug, Clone)]
pub struct ArrayRecord {
    pub values: Vec<i64>,
    pub element_type: String,
    pub global: bool,
}

/// All symbol tables the lowering pass maintains, owned by the backend for the
/// duration of a single compile. Kept as one struct so the shared traversal in
/// [`crate::lower::Backend`]'s default methods can mutate them without
/// threading half a dozen separate maps through every method signature.
#[derive(Debug, Default)]
pub struct SymbolTables {
    pub types: Vec<TypeRecord>,
    pub words: HashMap<String, WordRecord>,
    pub variables: Vec<Variable>,
    pub globals: HashMap<String, GlobalRecord>,
    pub consts: HashMap<String, i64>,
    pub arrays: Vec<ArrayRecord>,

    pub in_scope: bool,
    pub in_while: bool,
    pub current_loop: Option<u32>,
    pub block_counter: u32,
    pub this_func: Option<String>,
}

impl SymbolTables {
    pub fn new() -> Self {
        let mut table = Self::default();
        for (name, size) in [
            ("u8", 1),
            ("i8", 1),
            ("u16", 2),
            ("i16", 2),
            ("addr", 2),
            ("size", 2),
            ("usize", 2),
            ("cell", 2),
        ] {
            table.types.push(TypeRecord::primitive(name, size));
        }
        table.types.push(TypeRecord {
            name: "Array".to_string(),
            size_bytes: 6,
            is_struct: true,
            members: vec![
                ("length".to_string(), 0),
                ("memberSize".to_string(), 2),
                ("elements".to_string(), 4),
            ],
            has_init: false,
            has_deinit: false,
        });
        table
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeRecord> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn find_type_mut(&mut self, name: &str) -> Option<&mut TypeRecord> {
        self.types.iter_mut().find(|t| t.name == name)
    }

    pub fn type_exists(&self, name: &str) -> bool {
        self.find_type(name).is_some()
    }

    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn name_in_use(&self, name: &str) -> bool {
        self.words.contains_key(name)
            || self.find_variable(name).is_some()
            || self.globals.contains_key(name)
            || self.consts.contains_key(name)
            || self.type_exists(name)
    }

    /// Take a snapshot of the locals list for entering a nested scope.
    pub fn snapshot(&self) -> Vec<Variable> {
        self.variables.clone()
    }

    /// Restore the locals list to a snapshot taken at scope entry.
    pub fn restore(&mut self, snapshot: Vec<Variable>) {
        self.variables = snapshot;
    }

    /// Push a new local at offset 0, shifting every existing local's offset by its size.
    pub fn push_local(&mut self, name: String, ty: String, size: u32, array: bool, array_size: u64) {
        for existing in &mut self.variables {
            existing.offset += size;
        }
        self.variables.insert(
            0,
            Variable {
                name,
                ty,
                offset: 0,
                array,
                array_size,
                size,
            },
        );
    }

    /// Total byte size of every local declared since `since` (a snapshot taken at scope entry).
    pub fn scope_size(&self, since: &[Variable]) -> u32 {
        let introduced = self.variables.len() - since.len();
        self.variables[..introduced].iter().map(|v| v.size).sum()
    }

    pub fn next_block_id(&mut self) -> u32 {
        self.block_counter += 1;
        self.block_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_primitive_types() {
        let table = SymbolTables::new();
        assert_eq!(table.find_type("u16").unwrap().size_bytes, 2);
        assert_eq!(table.find_type("Array").unwrap().size_bytes, 6);
    }

    #[test]
    fn push_local_shifts_existing_offsets() {
        let mut table = SymbolTables::new();
        table.push_local("a".into(), "u8".into(), 1, false, 0);
        table.push_local("b".into(), "u16".into(), 2, false, 0);
        assert_eq!(table.find_variable("b").unwrap().offset, 0);
        assert_eq!(table.find_variable("a").unwrap().offset, 2);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut table = SymbolTables::new();
        table.push_local("a".into(), "u8".into(), 1, false, 0);
        let snap = table.snapshot();
        table.push_local("b".into(), "u16".into(), 2, false, 0);
        table.restore(snap);
        assert_eq!(table.variables.len(), 1);
        assert_eq!(table.variables[0].name, "a");
    }
}
