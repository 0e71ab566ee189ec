//! The UXN reference backend: emits Uxntal assembly text for Devine Lu
//! Linvega's 16-bit stack-machine virtual computer.
//!
//! Zero-page layout: `vsp` (2 bytes) holds the virtual stack pointer used for
//! locals and parameters, seeded to `#ffff` by the preamble; `arraySrc`/
//! `arrayDest` (2 bytes each) are scratch pointers `emit_array_copy` uses to
//! walk a byte-copy loop; `zfAddr`/`zfCount`/`zfFill` and `bcCount` are
//! scratch cells owned by the `uxn_zero_fill`/`uxn_byte_copy` runtime helper
//! routines seeded into the defs buffer by [`UxnBackend::new`].

use super::{Backend, Command, Location};
use crate::error::LowerError;
use crate::lower::symbols::SymbolTables;
use crate::span::Span;

pub const VSP: &str = "vsp";
pub const ARRAY_SRC: &str = "arraySrc";
pub const ARRAY_DEST: &str = "arrayDest";
pub const ZF_ADDR: &str = "zfAddr";
pub const ZF_COUNT: &str = "zfCount";
pub const ZF_FILL: &str = "zfFill";
pub const BC_COUNT: &str = "bcCount";

/// The `uxn_zero_fill`/`uxn_byte_copy` runtime helpers `emit_zero_init` and
/// `emit_array_copy` call out to. Seeded once into the defs buffer so every
/// program that declares a local or a local array literal links cleanly.
fn runtime_helpers() -> String {
    format!(
        "@uxn_zero_fill\n\
         \t.{ZF_FILL} STZ\n\
         \t.{ZF_COUNT} STZ2\n\
         \t.{ZF_ADDR} STZ2\n\
         @uxn_zero_fill_loop\n\
         \t.{ZF_COUNT} LDZ2 #0000 EQU2 ;uxn_zero_fill_done JCN2\n\
         \t.{ZF_FILL} LDZ .{ZF_ADDR} LDZ2 STA\n\
         \t.{ZF_ADDR} LDZ2 #0001 ADD2 .{ZF_ADDR} STZ2\n\
         \t.{ZF_COUNT} LDZ2 #0001 SUB2 .{ZF_COUNT} STZ2\n\
         \t;uxn_zero_fill_loop JMP2\n\
         @uxn_zero_fill_done\n\
         \tJMP2r\n\
         @uxn_byte_copy\n\
         \t.{BC_COUNT} STZ2\n\
         @uxn_byte_copy_loop\n\
         \t.{BC_COUNT} LDZ2 #0000 EQU2 ;uxn_byte_copy_done JCN2\n\
         \t.{ARRAY_SRC} LDZ2 LDA .{ARRAY_DEST} LDZ2 STA\n\
         \t.{ARRAY_SRC} LDZ2 #0001 ADD2 .{ARRAY_SRC} STZ2\n\
         \t.{ARRAY_DEST} LDZ2 #0001 ADD2 .{ARRAY_DEST} STZ2\n\
         \t.{BC_COUNT} LDZ2 #0001 SUB2 .{BC_COUNT} STZ2\n\
         \t;uxn_byte_copy_loop JMP2\n\
         @uxn_byte_copy_done\n\
         \tJMP2r\n"
    )
}

/// Uxntal emission grounded on the reference assembler's zero-page/device
/// conventions: `|0` short-mode zero-page declarations, a `|100` reset
/// vector, and a short trailing `|e0000` pad so the rom has a defined end.
pub struct UxnBackend {
    symbols: SymbolTables,
    defs: String,
    data: String,
    enabled_features: Vec<String>,
}

impl UxnBackend {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTables::new(),
            defs: runtime_helpers(),
            data: String::new(),
            enabled_features: Vec::new(),
        }
    }
}

impl Default for UxnBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for UxnBackend {
    fn symbols(&self) -> &SymbolTables {
        &self.symbols
    }

    fn symbols_mut(&mut self) -> &mut SymbolTables {
        &mut self.symbols
    }

    fn defs_buf_mut(&mut self) -> &mut String {
        &mut self.defs
    }

    fn data_buf_mut(&mut self) -> &mut String {
        &mut self.data
    }

    fn max_int(&self) -> i64 {
        0xffff
    }

    fn cell_size(&self) -> u32 {
        2
    }

    fn get_versions(&self) -> &'static [&'static str] {
        &["uxn", "IO", "16Bit", "ZeroPage"]
    }

    fn default_header(&self) -> String {
        format!(
            "|0 @{VSP} $2 @{ARRAY_SRC} $2 @{ARRAY_DEST} $2 @{ZF_ADDR} $2 @{ZF_COUNT} $2 @{ZF_FILL} $1 @{BC_COUNT} $2\n|100\n"
        )
    }

    fn supports_c_extern(&self) -> bool {
        false
    }

    fn preamble(&self) -> String {
        format!("#ffff .{VSP} STZ2\n")
    }

    fn begin_main_label(&self) -> String {
        "@calmain\n".to_string()
    }

    fn postlude(&self) -> String {
        "|e0000\n".to_string()
    }

    fn func_symbol(&self, mangled: &str) -> String {
        format!("func__{mangled}")
    }

    fn raw_symbol(&self, name: &str) -> String {
        name.to_string()
    }

    fn global_symbol(&self, name: &str) -> String {
        format!("global_{}", super::mangle(name))
    }

    fn array_symbol(&self, n: usize) -> String {
        format!("array_{n}")
    }

    fn array_meta_symbol(&self, n: usize) -> String {
        format!("array_{n}_meta")
    }

    fn type_init_symbol(&self, ty: &str) -> String {
        format!("init__{}", super::mangle(ty))
    }

    fn type_deinit_symbol(&self, ty: &str) -> String {
        format!("deinit__{}", super::mangle(ty))
    }

    fn emit_push_integer(&self, value: i64) -> String {
        // Pushed in short mode uniformly: every other VSP/arithmetic primitive
        // in this backend operates on the 2-byte cell, so literal pushes stay
        // the same width rather than narrowing based on magnitude.
        format!("#{:04x}\n", value & 0xffff)
    }

    fn emit_call(&self, symbol: &str) -> String {
        format!(";{symbol} JSR2\n")
    }

    fn emit_return(&self) -> String {
        "JMP2r\n".to_string()
    }

    fn emit_label(&self, label: &str) -> String {
        format!("@{label}\n")
    }

    fn emit_jump(&self, label: &str) -> String {
        format!(";{label} JMP2\n")
    }

    fn emit_jump_if_zero(&self, label: &str) -> String {
        // Conditions are pushed as 16-bit shorts like everything else on this
        // backend, so compare with EQU2 rather than the byte-only EQU, which
        // would otherwise leave the condition's high byte on the stack.
        format!("#0000 EQU2 ;{label} JCN2\n")
    }

    fn emit_jump_if_nonzero(&self, label: &str) -> String {
        format!("#0000 NEQ2 ;{label} JCN2\n")
    }

    fn emit_load(&self, location: &Location, size: u32) -> Result<String, LowerError> {
        if size != 1 && size != 2 {
            return Err(LowerError::InvalidSizeLoad(Span::synthetic(), size as usize));
        }
        let wide = size == 2;
        let mut out = String::new();
        match location {
            Location::Local(offset) => {
                out.push_str(&format!(".{VSP} LDZ2 #{} ADD2\n", hex4(*offset)));
                out.push_str(if wide { "LDA2\n" } else { "LDA NIP\n" });
            }
            Location::Global(symbol) => {
                out.push_str(&format!(";{symbol}\n"));
                out.push_str(if wide { "LDA2\n" } else { "LDA NIP\n" });
            }
        }
        Ok(out)
    }

    fn emit_store(&self, location: &Location, size: u32) -> Result<String, LowerError> {
        if size != 1 && size != 2 {
            return Err(LowerError::InvalidSizeLoad(Span::synthetic(), size as usize));
        }
        let wide = size == 2;
        let mut out = String::new();
        match location {
            Location::Local(offset) => {
                out.push_str(&format!(".{VSP} LDZ2 #{} ADD2\n", hex4(*offset)));
                out.push_str(if wide { "STA2\n" } else { "STA\n" });
            }
            Location::Global(symbol) => {
                out.push_str(&format!(";{symbol}\n"));
                out.push_str(if wide { "STA2\n" } else { "STA\n" });
            }
        }
        Ok(out)
    }

    fn emit_addr(&self, location: &Location) -> String {
        match location {
            Location::Local(offset) => format!(".{VSP} LDZ2 #{} ADD2\n", hex4(*offset)),
            Location::Global(symbol) => format!(";{symbol}\n"),
        }
    }

    fn emit_vsp_adjust(&self, delta: i64) -> String {
        if delta < 0 {
            format!(".{VSP} LDZ2 #{} SUB2 .{VSP} STZ2\n", hex4((-delta) as u32))
        } else if delta > 0 {
            format!(".{VSP} LDZ2 #{} ADD2 .{VSP} STZ2\n", hex4(delta as u32))
        } else {
            String::new()
        }
    }

    fn emit_zero_init(&self, offset: u32, size: u32) -> String {
        format!(
            ".{VSP} LDZ2 #{} ADD2 #{} #00 ;uxn_zero_fill JSR2\n",
            hex4(offset),
            hex4(size)
        )
    }

    fn emit_array_copy(&self, dest_offset: u32, src_symbol: &str, len_bytes: u32) -> String {
        format!(
            ";{src_symbol} .{ARRAY_SRC} STZ2 .{VSP} LDZ2 #{} ADD2 .{ARRAY_DEST} STZ2 #{} ;uxn_byte_copy JSR2\n",
            hex4(dest_offset),
            hex4(len_bytes)
        )
    }

    fn emit_array_header_store(&self, header_offset: u32, length: u64, member_size: u32) -> String {
        format!(
            "#{len:04x} .{VSP} LDZ2 #{lenoff} ADD2 STA2 #{msize:04x} .{VSP} LDZ2 #{msizeoff} ADD2 STA2 .{VSP} LDZ2 #{hdr} ADD2 .{VSP} LDZ2 #{elemoff} ADD2 STA2\n",
            len = length & 0xffff,
            lenoff = hex4(header_offset),
            msize = member_size,
            msizeoff = hex4(header_offset + 2),
            hdr = hex4(0),
            elemoff = hex4(header_offset + 4),
        )
    }

    fn emit_data_bytes(&self, values: &[i64], element_size: u32) -> String {
        let mut out = String::new();
        for value in values {
            if element_size == 1 {
                out.push_str(&format!("{:02x} ", value & 0xff));
            } else {
                out.push_str(&format!("{:04x} ", value & 0xffff));
            }
        }
        out.push('\n');
        out
    }

    fn emit_array_meta_data(&self, length: u64, member_size: u32, elements_symbol: &str) -> String {
        format!(
            "{:04x} {:04x} ;{elements_symbol}\n",
            length & 0xffff,
            member_size & 0xffff
        )
    }

    fn emit_global_reserve(&self, size: u32) -> String {
        format!("${:x}\n", size.max(1))
    }

    fn emit_raw_asm(&self, text: &str) -> String {
        let mut out = String::from(text);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    fn handle_option(&mut self, name: &str, _versions: &[String]) -> bool {
        if !self.enabled_features.iter().any(|f| f == name) {
            self.enabled_features.push(name.to_string());
        }
        true
    }

    fn final_commands(&self, input_path: &str, output_path: &str, keep_asm: bool) -> Vec<Command> {
        let asm_path = format!("{output_path}.tal");
        let mut commands = vec![
            Command::new("cp", vec![input_path.to_string(), asm_path.clone()]),
            Command::new("uxnasm", vec![asm_path.clone(), output_path.to_string()]),
        ];
        if !keep_asm {
            commands.push(Command::new("rm", vec![asm_path]));
        }
        commands
    }

    fn new_const(&mut self, _name: &str, _value: i64) {}
}

fn hex4(value: u32) -> String {
    format!("{:04x}", value & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstKind, AstNode};
    use crate::lower::lower;
    use crate::span::Span;

    fn int(v: i64) -> AstNode {
        AstNode::new(AstKind::Integer(v), Span::synthetic())
    }

    #[test]
    fn header_declares_zero_page_and_reset_vector() {
        let mut backend = UxnBackend::new();
        let out = lower(&mut backend, &[int(1), int(2)]).unwrap();
        assert!(out.starts_with("|0"));
        assert!(out.contains("|100"));
        assert!(out.contains("@calmain"));
    }

    #[test]
    fn output_ends_with_the_trailing_data_stack_pad() {
        let mut backend = UxnBackend::new();
        let out = lower(&mut backend, &[int(1)]).unwrap();
        assert!(out.ends_with("|e0000\n"));
    }

    #[test]
    fn narrow_load_nips_the_discarded_high_byte() {
        use crate::lexer::tokenize;
        use crate::parser::parse;
        use crate::span::Code;

        let source = b"let u8 x 5 x".to_vec();
        let code = Code::new("test", &source);
        let tokens = tokenize(&code).unwrap();
        let ast = parse(&tokens).unwrap();
        let mut backend = UxnBackend::new();
        let out = lower(&mut backend, &ast).unwrap();
        assert!(out.contains("LDA NIP"));
    }

    #[test]
    fn let_then_set_then_word_round_trips_through_vsp() {
        use crate::lexer::tokenize;
        use crate::parser::parse;
        use crate::span::Code;

        let source = b"func main begin let u16 x 5 -> x x end".to_vec();
        let code = Code::new("test", &source);
        let tokens = tokenize(&code).unwrap();
        let ast = parse(&tokens).unwrap();
        let mut backend = UxnBackend::new();
        let out = lower(&mut backend, &ast).unwrap();
        assert!(out.contains("LDZ2"));
        assert!(out.contains("STA2"));
        assert!(out.contains("LDA2"));
    }

    #[test]
    fn runtime_helpers_are_linked_into_every_program() {
        let mut backend = UxnBackend::new();
        let out = lower(&mut backend, &[int(1)]).unwrap();
        assert!(out.contains("@uxn_zero_fill\n"));
        assert!(out.contains("@uxn_byte_copy\n"));
    }

    #[test]
    fn rejects_struct_sized_word_load() {
        use crate::lexer::tokenize;
        use crate::parser::parse;
        use crate::span::Code;

        let source = b"struct Point u16 x u16 y end let Point p p".to_vec();
        let code = Code::new("test", &source);
        let tokens = tokenize(&code).unwrap();
        let ast = parse(&tokens).unwrap();
        let mut backend = UxnBackend::new();
        let err = lower(&mut backend, &ast).unwrap_err();
        assert!(matches!(err, LowerError::StructAsScalar(_)));
    }
}
