//! Backend-agnostic lowering contract: the AST-to-assembly traversal and the
//! shared symbol-table algorithm every backend composes.
//!
//! Mirrors the split in `other_examples`' `StackBackend` trait: a handful of
//! required, backend-specific instruction emitters, and a larger set of
//! default methods implementing the traversal and bookkeeping algorithm on
//! top of them. A concrete backend (see [`uxn`]) owns its [`SymbolTables`]
//! and output buffers directly, matching the contract that "the backend owns
//! all symbol tables and an append-only output buffer".

pub mod symbols;
pub mod uxn;

use crate::ast::{AstKind, AstNode, ExternKind, ImplementMethod};
use crate::error::LowerError;
use crate::policy::is_reserved;
use crate::span::Span;
use symbols::{GlobalRecord, SymbolTables, TypeRecord, Variable, WordRecord};

/// Where a loaded/stored/addressed value lives.
#[derive(Debug, Clone)]
pub enum Location {
    Local(u32),
    Global(String),
}

/// A post-compile shell invocation a backend would like the external driver
/// to run (assembler, linker, cleanup). Returned as data; never executed by
/// this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Replace characters unsafe for an assembler symbol with a reversible `_NN`
/// hex escape.
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!("_{:02x}", c as u32));
        }
    }
    out
}

/// Lower a complete AST through `backend`, returning the assembled output text.
#[tracing::instrument(skip(backend, ast))]
pub fn lower<B: Backend + ?Sized>(backend: &mut B, ast: &[AstNode]) -> Result<String, LowerError> {
    let mut main = String::new();
    for node in ast {
        backend.compile_node(node, &mut main)?;
    }

    let mut output = String::new();
    output.push_str(&backend.default_header());
    output.push_str(&backend.preamble());
    output.push_str(&backend.begin_main_label());
    output.push_str(&main);

    let globals: Vec<(String, GlobalRecord)> = backend
        .symbols()
        .globals
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (name, global) in &globals {
        let has_deinit = backend
            .symbols()
            .find_type(&global.ty)
            .map_or(false, |t| t.has_deinit);
        if has_deinit {
            let deinit_sym = backend.type_deinit_symbol(&global.ty);
            let gsym = backend.global_symbol(name);
            output.push_str(&backend.emit_addr(&Location::Global(gsym)));
            output.push_str(&backend.emit_call(&deinit_sym));
        }
    }
    output.push_str(&backend.emit_return());
    output.push_str(backend.defs_buf_mut());
    output.push_str(backend.data_buf_mut());
    output.push_str(&backend.postlude());
    Ok(output)
}

/// The multi-target lowering contract. See module docs for the split between
/// required primitives and the default shared algorithm.
pub trait Backend {
    // ---- symbol tables & buffers the backend owns ----
    fn symbols(&self) -> &SymbolTables;
    fn symbols_mut(&mut self) -> &mut SymbolTables;
    fn defs_buf_mut(&mut self) -> &mut String;
    fn data_buf_mut(&mut self) -> &mut String;

    // ---- backend identity ----
    fn max_int(&self) -> i64;
    fn cell_size(&self) -> u32;
    fn get_versions(&self) -> &'static [&'static str];
    fn default_header(&self) -> String;
    fn supports_c_extern(&self) -> bool {
        false
    }

    // ---- program structure ----
    fn preamble(&self) -> String;
    fn begin_main_label(&self) -> String;
    /// Trailing text after all definitions and data, e.g. a rom-size pad.
    fn postlude(&self) -> String {
        String::new()
    }

    // ---- symbol naming ----
    fn func_symbol(&self, mangled: &str) -> String;
    fn raw_symbol(&self, name: &str) -> String;
    fn global_symbol(&self, name: &str) -> String;
    fn array_symbol(&self, n: usize) -> String;
    fn array_meta_symbol(&self, n: usize) -> String;
    fn type_init_symbol(&self, ty: &str) -> String;
    fn type_deinit_symbol(&self, ty: &str) -> String;

    // ---- instruction emission ----
    fn emit_push_integer(&self, value: i64) -> String;
    fn emit_call(&self, symbol: &str) -> String;
    fn emit_return(&self) -> String;
    fn emit_label(&self, label: &str) -> String;
    fn emit_jump(&self, label: &str) -> String;
    fn emit_jump_if_zero(&self, label: &str) -> String;
    fn emit_jump_if_nonzero(&self, label: &str) -> String;
    fn emit_load(&self, location: &Location, size: u32) -> Result<String, LowerError>;
    fn emit_store(&self, location: &Location, size: u32) -> Result<String, LowerError>;
    fn emit_addr(&self, location: &Location) -> String;
    /// Negative `delta` allocates (decrements VSP); positive releases (increments VSP).
    /// Always a 16-bit adjustment regardless of the operand size being reserved.
    fn emit_vsp_adjust(&self, delta: i64) -> String;
    fn emit_zero_init(&self, offset: u32, size: u32) -> String;
    fn emit_array_copy(&self, dest_offset: u32, src_symbol: &str, len_bytes: u32) -> String;
    fn emit_array_header_store(&self, header_offset: u32, length: u64, member_size: u32) -> String;
    fn emit_data_bytes(&self, values: &[i64], element_size: u32) -> String;
    fn emit_array_meta_data(&self, length: u64, member_size: u32, elements_symbol: &str) -> String;
    fn emit_global_reserve(&self, size: u32) -> String;
    fn emit_raw_asm(&self, text: &str) -> String;

    // ---- extension points ----
    fn handle_option(&mut self, name: &str, versions: &[String]) -> bool;
    fn final_commands(&self, input_path: &str, output_path: &str, keep_asm: bool) -> Vec<Command>;
    fn new_const(&mut self, _name: &str, _value: i64) {}

    // ==================== shared traversal (default methods) ====================

    /// Dispatch a single AST node, appending its compiled form to `out`.
    /// Definition-kind nodes (`FuncDef`, `Struct`, ...) ignore `out` and
    /// contribute to [`Backend::defs_buf_mut`] instead, regardless of where
    /// in the tree they appear.
    fn compile_node(&mut self, node: &AstNode, out: &mut String) -> Result<(), LowerError> {
        match &node.kind {
            AstKind::Word(name) => self.compile_word(name, &node.span, out),
            AstKind::Integer(value) => self.compile_integer(*value, &node.span, out),
            AstKind::String { body, constant } => {
                self.compile_string(body, *constant, &node.span, out)
            }
            AstKind::Array {
                element_type,
                elements,
                constant,
            } => self.compile_array(element_type, elements, *constant, &node.span, out),
            AstKind::FuncDef {
                name,
                inline,
                raw,
                params,
                body,
            } => self.compile_func_def(name, *inline, *raw, params, body, &node.span),
            AstKind::Include { path } => {
                tracing::debug!(%path, "include directive left to the external driver");
                Ok(())
            }
            AstKind::Asm { text } => {
                out.push_str(&self.emit_raw_asm(text));
                Ok(())
            }
            AstKind::If { clauses, else_body } => {
                self.compile_if(clauses, else_body.as_deref(), out)
            }
            AstKind::While { condition, body } => self.compile_while(condition, body, out),
            AstKind::Let {
                ty,
                name,
                array,
                array_size,
            } => self.compile_let(ty, name, *array, *array_size, &node.span, out),
            AstKind::Enable { name } => self.compile_enable(name, out),
            AstKind::Requires { name } => self.compile_requires(name, &node.span),
            AstKind::Restrict { name } => self.compile_restrict(name, &node.span),
            AstKind::Version { name, not, body } => {
                self.compile_version(name, *not, body, out)
            }
            AstKind::Struct {
                name,
                parent,
                members,
            } => self.compile_struct(name, parent.as_deref(), members, &node.span),
            AstKind::Const { name, value } => self.compile_const(name, *value, &node.span),
            AstKind::Enum {
                name,
                base_type,
                members,
            } => self.compile_enum(name, base_type, members, &node.span),
            AstKind::Union { name, members } => self.compile_union(name, members, &node.span),
            AstKind::Alias {
                to,
                from,
                overwrite,
            } => self.compile_alias(to, from, *overwrite, &node.span),
            AstKind::Extern { name, kind } => self.compile_extern(name, kind, &node.span),
            AstKind::Addr { target } => self.compile_addr(target, &node.span, out),
            AstKind::Implement {
                struct_name,
                method,
                body,
            } => self.compile_implement(struct_name, *method, body, &node.span),
            AstKind::Set { name } => self.compile_set(name, &node.span, out),
            AstKind::Return => self.compile_return(&node.span, out),
            AstKind::Break => self.compile_break(&node.span, out),
            AstKind::Continue => self.compile_continue(&node.span, out),
        }
    }

    /// Word resolution: known word (inline/raw/mangled call), local, global,
    /// then constant, in that priority order.
    fn compile_word(&mut self, name: &str, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if let Some(record) = self.symbols().words.get(name).cloned() {
            return self.emit_call_for_word(name, &record, out);
        }
        if let Some(var) = self.symbols().find_variable(name).cloned() {
            let ty = self.symbols().find_type(&var.ty).cloned();
            if ty.as_ref().map_or(false, |t| t.is_struct) {
                return Err(LowerError::StructAsScalar(span.clone()));
            }
            let text = self.emit_load(&Location::Local(var.offset), var.size)?;
            out.push_str(&text);
            return Ok(());
        }
        if let Some(global) = self.symbols().globals.get(name).cloned() {
            let ty = self.symbols().find_type(&global.ty).cloned();
            if ty.as_ref().map_or(false, |t| t.is_struct) {
                return Err(LowerError::StructAsScalar(span.clone()));
            }
            let size = ty.map_or(self.cell_size(), |t| t.size_bytes);
            let sym = self.global_symbol(name);
            let text = self.emit_load(&Location::Global(sym), size)?;
            out.push_str(&text);
            return Ok(());
        }
        if let Some(value) = self.symbols().consts.get(name).copied() {
            out.push_str(&self.emit_push_integer(value));
            return Ok(());
        }
        Err(LowerError::UndefinedIdentifier(span.clone(), name.to_string()))
    }

    /// Shared "CompileCall" behaviour: expand inline bodies, or emit a call
    /// to the word's raw or mangled symbol.
    fn emit_call_for_word(
        &mut self,
        name: &str,
        record: &WordRecord,
        out: &mut String,
    ) -> Result<(), LowerError> {
        if record.inline {
            let body = record.inline_body.clone().unwrap_or_default();
            for child in &body {
                self.compile_node(child, out)?;
            }
            return Ok(());
        }
        let symbol = if record.raw {
            self.raw_symbol(name)
        } else {
            self.func_symbol(&mangle(name))
        };
        out.push_str(&self.emit_call(&symbol));
        Ok(())
    }

    fn compile_integer(&mut self, value: i64, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if value > self.max_int() {
            return Err(LowerError::IntegerOverflow(span.clone(), value, self.max_int()));
        }
        out.push_str(&self.emit_push_integer(value));
        Ok(())
    }

    /// Desugar a string literal into a `u8` array literal.
    fn compile_string(
        &mut self,
        body: &str,
        constant: bool,
        span: &Span,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let elements: Vec<AstNode> = body
            .bytes()
            .map(|b| AstNode::new(AstKind::Integer(b as i64), span.clone()))
            .collect();
        self.compile_array("u8", &elements, constant, span, out)
    }

    fn compile_array(
        &mut self,
        element_type: &str,
        elements: &[AstNode],
        constant: bool,
        span: &Span,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let elem_size = self
            .symbols()
            .find_type(element_type)
            .ok_or_else(|| LowerError::UndefinedType(span.clone(), element_type.to_string()))?
            .size_bytes;

        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            let value = match &element.kind {
                AstKind::Integer(v) => *v,
                AstKind::Word(w) if constant => self
                    .symbols()
                    .consts
                    .get(w)
                    .copied()
                    .ok_or_else(|| LowerError::IllegalArrayElement(element.span.clone()))?,
                _ => return Err(LowerError::IllegalArrayElement(element.span.clone())),
            };
            values.push(value);
        }

        let global = !self.symbols().in_scope || constant;
        let n = self.symbols().arrays.len();
        self.symbols_mut().arrays.push(symbols::ArrayRecord {
            values: values.clone(),
            element_type: element_type.to_string(),
            global,
        });

        let data_symbol = self.array_symbol(n);
        let meta_symbol = self.array_meta_symbol(n);
        self.data_buf_mut().push_str(&self.emit_label(&data_symbol));
        let data_text = self.emit_data_bytes(&values, elem_size);
        self.data_buf_mut().push_str(&data_text);
        self.data_buf_mut().push_str(&self.emit_label(&meta_symbol));
        let meta_text = self.emit_array_meta_data(values.len() as u64, elem_size, &data_symbol);
        self.data_buf_mut().push_str(&meta_text);

        if global {
            out.push_str(&self.emit_addr(&Location::Global(meta_symbol)));
        } else {
            let copy_bytes = elem_size * values.len() as u32;
            let total = copy_bytes + 6; // copy + Array{length,memberSize,elements} header
            self.symbols_mut().push_local(
                format!("$array_{n}"),
                "Array".to_string(),
                total,
                true,
                values.len() as u64,
            );
            out.push_str(&self.emit_vsp_adjust(-(total as i64)));
            out.push_str(&self.emit_array_copy(0, &data_symbol, copy_bytes));
            out.push_str(&self.emit_array_header_store(copy_bytes, values.len() as u64, elem_size));
            out.push_str(&self.emit_addr(&Location::Local(copy_bytes)));
        }
        Ok(())
    }

    fn compile_let(
        &mut self,
        ty: &str,
        name: &str,
        array: bool,
        array_size: u64,
        span: &Span,
        out: &mut String,
    ) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }
        if array && array_size == 0 {
            return Err(LowerError::ZeroLengthArray(span.clone()));
        }
        let type_record = self
            .symbols()
            .find_type(ty)
            .cloned()
            .ok_or_else(|| LowerError::UndefinedType(span.clone(), ty.to_string()))?;
        let size = if array {
            type_record.size_bytes * array_size as u32
        } else {
            type_record.size_bytes
        };

        if !self.symbols().in_scope {
            self.symbols_mut().globals.insert(
                name.to_string(),
                GlobalRecord {
                    ty: ty.to_string(),
                    array,
                    array_size,
                },
            );
            let gsym = self.global_symbol(name);
            let reserve = self.emit_global_reserve(size);
            self.data_buf_mut().push_str(&self.emit_label(&gsym));
            self.data_buf_mut().push_str(&reserve);
            if type_record.has_init {
                let init_sym = self.type_init_symbol(ty);
                out.push_str(&self.emit_addr(&Location::Global(gsym)));
                out.push_str(&self.emit_call(&init_sym));
            }
            return Ok(());
        }

        self.symbols_mut()
            .push_local(name.to_string(), ty.to_string(), size, array, array_size);
        out.push_str(&self.emit_vsp_adjust(-(size as i64)));
        out.push_str(&self.emit_zero_init(0, size));
        if type_record.has_init {
            let init_sym = self.type_init_symbol(ty);
            out.push_str(&self.emit_addr(&Location::Local(0)));
            out.push_str(&self.emit_call(&init_sym));
        }
        Ok(())
    }

    fn compile_set(&mut self, name: &str, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if let Some(var) = self.symbols().find_variable(name).cloned() {
            let text = self.emit_store(&Location::Local(var.offset), var.size)?;
            out.push_str(&text);
            return Ok(());
        }
        if let Some(global) = self.symbols().globals.get(name).cloned() {
            let size = self
                .symbols()
                .find_type(&global.ty)
                .map_or(self.cell_size(), |t| t.size_bytes);
            let sym = self.global_symbol(name);
            let text = self.emit_store(&Location::Global(sym), size)?;
            out.push_str(&text);
            return Ok(());
        }
        Err(LowerError::UndefinedIdentifier(span.clone(), name.to_string()))
    }

    fn compile_addr(&mut self, target: &str, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if let Some(record) = self.symbols().words.get(target).cloned() {
            if record.inline {
                return Err(LowerError::UndefinedIdentifier(span.clone(), target.to_string()));
            }
            let sym = if record.raw {
                self.raw_symbol(target)
            } else {
                self.func_symbol(&mangle(target))
            };
            out.push_str(&self.emit_addr(&Location::Global(sym)));
            return Ok(());
        }
        if let Some(var) = self.symbols().find_variable(target).cloned() {
            out.push_str(&self.emit_addr(&Location::Local(var.offset)));
            return Ok(());
        }
        if self.symbols().globals.contains_key(target) {
            let sym = self.global_symbol(target);
            out.push_str(&self.emit_addr(&Location::Global(sym)));
            return Ok(());
        }
        Err(LowerError::UndefinedIdentifier(span.clone(), target.to_string()))
    }

    /// Emit deinit calls for every local introduced since `snapshot`, then
    /// release the whole scope in one VSP adjustment, then restore the
    /// compile-time locals list.
    fn scope_exit(&mut self, out: &mut String, snapshot: &[Variable]) -> Result<(), LowerError> {
        let introduced = self.symbols().variables.len() - snapshot.len();
        let locals: Vec<Variable> = self.symbols().variables[..introduced].to_vec();
        for local in &locals {
            if let Some(t) = self.symbols().find_type(&local.ty) {
                if t.has_deinit {
                    let sym = self.type_deinit_symbol(&local.ty);
                    out.push_str(&self.emit_addr(&Location::Local(local.offset)));
                    out.push_str(&self.emit_call(&sym));
                }
            }
        }
        let total: u32 = locals.iter().map(|v| v.size).sum();
        if total > 0 {
            out.push_str(&self.emit_vsp_adjust(total as i64));
        }
        self.symbols_mut().restore(snapshot.to_vec());
        Ok(())
    }

    fn compile_if(
        &mut self,
        clauses: &[crate::ast::IfClause],
        else_body: Option<&[AstNode]>,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let id = self.symbols_mut().next_block_id();
        for (k, clause) in clauses.iter().enumerate() {
            for cond in &clause.condition {
                self.compile_node(cond, out)?;
            }
            let label = format!("if_{id}_{}", k + 1);
            out.push_str(&self.emit_jump_if_zero(&label));
            let snapshot = self.symbols().snapshot();
            for stmt in &clause.body {
                self.compile_node(stmt, out)?;
            }
            self.scope_exit(out, &snapshot)?;
            out.push_str(&self.emit_jump(&format!("if_{id}_end")));
            out.push_str(&self.emit_label(&label));
        }
        if let Some(body) = else_body {
            let snapshot = self.symbols().snapshot();
            for stmt in body {
                self.compile_node(stmt, out)?;
            }
            self.scope_exit(out, &snapshot)?;
        }
        out.push_str(&self.emit_label(&format!("if_{id}_end")));
        Ok(())
    }

    fn compile_while(
        &mut self,
        condition: &[AstNode],
        body: &[AstNode],
        out: &mut String,
    ) -> Result<(), LowerError> {
        let id = self.symbols_mut().next_block_id();
        out.push_str(&self.emit_jump(&format!("while_{id}_condition")));
        out.push_str(&self.emit_label(&format!("while_{id}")));

        let snapshot = self.symbols().snapshot();
        let prev_in_while = self.symbols().in_while;
        let prev_loop = self.symbols().current_loop;
        self.symbols_mut().in_while = true;
        self.symbols_mut().current_loop = Some(id);
        for stmt in body {
            self.compile_node(stmt, out)?;
        }
        self.symbols_mut().in_while = prev_in_while;
        self.symbols_mut().current_loop = prev_loop;

        out.push_str(&self.emit_label(&format!("while_{id}_next")));
        self.scope_exit(out, &snapshot)?;
        out.push_str(&self.emit_label(&format!("while_{id}_condition")));
        for cond in condition {
            self.compile_node(cond, out)?;
        }
        out.push_str(&self.emit_jump_if_nonzero(&format!("while_{id}")));
        out.push_str(&self.emit_label(&format!("while_{id}_end")));
        Ok(())
    }

    fn compile_return(&mut self, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if !self.symbols().in_scope {
            return Err(LowerError::ReturnOutsideFunction(span.clone()));
        }
        let locals = self.symbols().variables.clone();
        for local in &locals {
            if let Some(t) = self.symbols().find_type(&local.ty) {
                if t.has_deinit {
                    let sym = self.type_deinit_symbol(&local.ty);
                    out.push_str(&self.emit_addr(&Location::Local(local.offset)));
                    out.push_str(&self.emit_call(&sym));
                }
            }
        }
        let total: u32 = locals.iter().map(|v| v.size).sum();
        if total > 0 {
            out.push_str(&self.emit_vsp_adjust(total as i64));
        }
        out.push_str(&self.emit_return());
        Ok(())
    }

    fn compile_break(&mut self, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if !self.symbols().in_while {
            return Err(LowerError::BreakOutsideLoop(span.clone()));
        }
        let id = self.symbols().current_loop.unwrap();
        out.push_str(&self.emit_jump(&format!("while_{id}_end")));
        Ok(())
    }

    fn compile_continue(&mut self, span: &Span, out: &mut String) -> Result<(), LowerError> {
        if !self.symbols().in_while {
            return Err(LowerError::ContinueOutsideLoop(span.clone()));
        }
        let id = self.symbols().current_loop.unwrap();
        out.push_str(&self.emit_jump(&format!("while_{id}_next")));
        Ok(())
    }

    fn compile_func_def(
        &mut self,
        name: &str,
        inline: bool,
        raw: bool,
        params: &[(String, String)],
        body: &[AstNode],
        span: &Span,
    ) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }

        if inline {
            self.symbols_mut().words.insert(
                name.to_string(),
                WordRecord {
                    raw: false,
                    inline: true,
                    inline_body: Some(body.to_vec()),
                },
            );
            return Ok(());
        }

        for (ty, _) in params {
            let record = self
                .symbols()
                .find_type(ty)
                .cloned()
                .ok_or_else(|| LowerError::UndefinedType(span.clone(), ty.to_string()))?;
            if record.is_struct {
                return Err(LowerError::StructAsParameter(span.clone()));
            }
        }

        let symbol = if raw {
            self.raw_symbol(name)
        } else {
            self.func_symbol(&mangle(name))
        };
        self.symbols_mut().words.insert(
            name.to_string(),
            WordRecord {
                raw,
                inline: false,
                inline_body: None,
            },
        );

        let snapshot = self.symbols().snapshot();
        self.symbols_mut().in_scope = true;
        let previous_func = self.symbols_mut().this_func.replace(name.to_string());

        let mut body_out = String::new();
        body_out.push_str(&self.emit_label(&symbol));

        if !params.is_empty() {
            let cell = self.cell_size();
            let frame = params.len() as i64 * cell as i64;
            body_out.push_str(&self.emit_vsp_adjust(-frame));
            for (ty, pname) in params {
                self.symbols_mut()
                    .push_local(pname.clone(), ty.clone(), cell, false, 0);
            }
            for (_, pname) in params.iter().rev() {
                let var = self.symbols().find_variable(pname).cloned().unwrap();
                let text = self.emit_store(&Location::Local(var.offset), var.size)?;
                body_out.push_str(&text);
            }
        }

        for stmt in body {
            self.compile_node(stmt, &mut body_out)?;
        }
        self.scope_exit(&mut body_out, &snapshot)?;
        body_out.push_str(&self.emit_return());

        self.symbols_mut().restore(snapshot);
        self.symbols_mut().in_scope = false;
        self.symbols_mut().this_func = previous_func;
        self.defs_buf_mut().push_str(&body_out);
        Ok(())
    }

    fn compile_struct(
        &mut self,
        name: &str,
        parent: Option<&str>,
        members: &[crate::ast::StructMember],
        span: &Span,
    ) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }

        let mut offsets: Vec<(String, u32)> = Vec::new();
        let mut all_members: Vec<(String, u32)> = Vec::new();
        let mut cursor = 0u32;

        if let Some(parent_name) = parent {
            let parent_type = self
                .symbols()
                .find_type(parent_name)
                .cloned()
                .ok_or_else(|| LowerError::UndefinedType(span.clone(), parent_name.to_string()))?;
            for (member_name, member_size) in &parent_type.members {
                offsets.push((member_name.clone(), cursor));
                all_members.push((member_name.clone(), *member_size));
                cursor += member_size;
            }
        }

        for member in members {
            if offsets.iter().any(|(n, _)| n == &member.name) {
                return Err(LowerError::NameCollision(span.clone(), member.name.clone()));
            }
            let base = self
                .symbols()
                .find_type(&member.ty)
                .cloned()
                .ok_or_else(|| LowerError::UndefinedType(span.clone(), member.ty.clone()))?;
            let size = if member.array {
                base.size_bytes * member.size as u32
            } else {
                base.size_bytes
            };
            offsets.push((member.name.clone(), cursor));
            all_members.push((member.name.clone(), size));
            cursor += size;
        }

        for (member_name, offset) in &offsets {
            self.symbols_mut()
                .consts
                .insert(format!("{name}.{member_name}"), *offset as i64);
        }
        self.symbols_mut()
            .consts
            .insert(format!("{name}.sizeof"), cursor as i64);
        self.symbols_mut().types.push(TypeRecord {
            name: name.to_string(),
            size_bytes: cursor,
            is_struct: true,
            members: all_members,
            has_init: false,
            has_deinit: false,
        });
        Ok(())
    }

    fn compile_const(&mut self, name: &str, value: i64, span: &Span) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }
        self.symbols_mut().consts.insert(name.to_string(), value);
        self.new_const(name, value);
        Ok(())
    }

    fn compile_enum(
        &mut self,
        name: &str,
        base_type: &str,
        members: &[(String, i64)],
        span: &Span,
    ) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }
        let base = self
            .symbols()
            .find_type(base_type)
            .cloned()
            .ok_or_else(|| LowerError::UndefinedType(span.clone(), base_type.to_string()))?;

        for (member_name, value) in members {
            self.symbols_mut()
                .consts
                .insert(format!("{name}.{member_name}"), *value);
        }
        let min = members.iter().map(|(_, v)| *v).min().unwrap_or(0);
        let max = members.iter().map(|(_, v)| *v).max().unwrap_or(0);
        self.symbols_mut().consts.insert(format!("{name}.min"), min);
        self.symbols_mut().consts.insert(format!("{name}.max"), max);
        self.symbols_mut()
            .consts
            .insert(format!("{name}.sizeof"), base.size_bytes as i64);
        self.symbols_mut().types.push(TypeRecord {
            name: name.to_string(),
            size_bytes: base.size_bytes,
            is_struct: false,
            members: Vec::new(),
            has_init: false,
            has_deinit: false,
        });
        Ok(())
    }

    fn compile_union(&mut self, name: &str, members: &[String], span: &Span) -> Result<(), LowerError> {
        if is_reserved(name) {
            return Err(LowerError::ReservedName(span.clone(), name.to_string()));
        }
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        let mut max_size = 0u32;
        for member in members {
            if !seen.insert(member.clone()) {
                return Err(LowerError::DuplicateUnionMember(
                    span.clone(),
                    name.to_string(),
                    member.clone(),
                ));
            }
            let t = self
                .symbols()
                .find_type(member)
                .cloned()
                .ok_or_else(|| LowerError::UndefinedType(span.clone(), member.clone()))?;
            max_size = max_size.max(t.size_bytes);
        }
        self.symbols_mut().types.push(TypeRecord {
            name: name.to_string(),
            size_bytes: max_size,
            is_struct: false,
            members: Vec::new(),
            has_init: false,
            has_deinit: false,
        });
        Ok(())
    }

    fn compile_alias(
        &mut self,
        to: &str,
        from: &str,
        overwrite: bool,
        span: &Span,
    ) -> Result<(), LowerError> {
        let source = self
            .symbols()
            .find_type(from)
            .cloned()
            .ok_or_else(|| LowerError::UndefinedType(span.clone(), from.to_string()))?;
        let existing = self.symbols().types.iter().position(|t| t.name == to);
        if existing.is_some() && !overwrite {
            return Err(LowerError::NameCollision(span.clone(), to.to_string()));
        }
        let mut aliased = source;
        aliased.name = to.to_string();
        match existing {
            Some(idx) => self.symbols_mut().types[idx] = aliased,
            None => self.symbols_mut().types.push(aliased),
        }
        Ok(())
    }

    fn compile_extern(&mut self, name: &str, kind: &ExternKind, span: &Span) -> Result<(), LowerError> {
        if self.symbols().name_in_use(name) {
            return Err(LowerError::NameCollision(span.clone(), name.to_string()));
        }
        if matches!(kind, ExternKind::C { .. }) && !self.supports_c_extern() {
            return Err(LowerError::UnsupportedExternKind(span.clone(), "C".to_string()));
        }
        let raw = matches!(kind, ExternKind::Raw);
        self.symbols_mut().words.insert(
            name.to_string(),
            WordRecord {
                raw,
                inline: false,
                inline_body: None,
            },
        );
        Ok(())
    }

    fn compile_implement(
        &mut self,
        struct_name: &str,
        method: ImplementMethod,
        body: &[AstNode],
        span: &Span,
    ) -> Result<(), LowerError> {
        let type_idx = self
            .symbols()
            .types
            .iter()
            .position(|t| t.name == struct_name)
            .ok_or_else(|| LowerError::UndefinedType(span.clone(), struct_name.to_string()))?;
        let already = match method {
            ImplementMethod::Init => self.symbols().types[type_idx].has_init,
            ImplementMethod::Deinit => self.symbols().types[type_idx].has_deinit,
        };
        if already {
            return Err(LowerError::DuplicateInitOrDeinit(
                span.clone(),
                struct_name.to_string(),
                method.to_string(),
            ));
        }

        let symbol = match method {
            ImplementMethod::Init => self.type_init_symbol(struct_name),
            ImplementMethod::Deinit => self.type_deinit_symbol(struct_name),
        };

        let snapshot = self.symbols().snapshot();
        self.symbols_mut().in_scope = true;
        let cell = self.cell_size();
        self.symbols_mut()
            .push_local("self".to_string(), "addr".to_string(), cell, false, 0);

        let mut body_out = String::new();
        body_out.push_str(&self.emit_label(&symbol));
        body_out.push_str(&self.emit_vsp_adjust(-(cell as i64)));
        {
            let var = self.symbols().find_variable("self").cloned().unwrap();
            let text = self.emit_store(&Location::Local(var.offset), var.size)?;
            body_out.push_str(&text);
        }

        for stmt in body {
            self.compile_node(stmt, &mut body_out)?;
        }
        self.scope_exit(&mut body_out, &snapshot)?;
        body_out.push_str(&self.emit_return());

        self.symbols_mut().restore(snapshot);
        self.symbols_mut().in_scope = false;
        self.defs_buf_mut().push_str(&body_out);

        match method {
            ImplementMethod::Init => self.symbols_mut().types[type_idx].has_init = true,
            ImplementMethod::Deinit => self.symbols_mut().types[type_idx].has_deinit = true,
        }
        Ok(())
    }

    fn compile_enable(&mut self, name: &str, _out: &mut String) -> Result<(), LowerError> {
        self.handle_option(name, &[]);
        Ok(())
    }

    fn compile_requires(&mut self, name: &str, span: &Span) -> Result<(), LowerError> {
        if !self.get_versions().contains(&name) {
            return Err(LowerError::InvalidAttribute(span.clone(), name.to_string()));
        }
        Ok(())
    }

    fn compile_restrict(&mut self, name: &str, span: &Span) -> Result<(), LowerError> {
        if !self.get_versions().contains(&name) {
            return Err(LowerError::InvalidAttribute(span.clone(), name.to_string()));
        }
        Ok(())
    }

    fn compile_version(
        &mut self,
        name: &str,
        not: bool,
        body: &[AstNode],
        out: &mut String,
    ) -> Result<(), LowerError> {
        let active = self.get_versions().contains(&name);
        let should_compile = if not { !active } else { active };
        if should_compile {
            for stmt in body {
                self.compile_node(stmt, out)?;
            }
        }
        Ok(())
    }
}
