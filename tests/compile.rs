use callisto::lower::uxn::UxnBackend;
use callisto::lower::{lower, Backend};
use callisto::span::Code;
use callisto::{lexer, parser};

fn compile(src: &str) -> String {
    let code = Code::new("test.cal", src.as_bytes());
    let tokens = match lexer::tokenize(&code) {
        Ok(t) => t,
        Err(err) => panic!("lex error: {err}"),
    };
    let ast = match parser::parse(&tokens) {
        Ok(a) => a,
        Err(err) => panic!("parse error: {err}"),
    };
    let mut backend = UxnBackend::new();
    match lower(&mut backend, &ast) {
        Ok(asm) => asm,
        Err(err) => panic!("lower error: {err}"),
    }
}

#[test]
fn simple_main_emits_reset_vector_and_calls() {
    let asm = compile("func main begin 1 2 end");
    assert!(asm.contains("|100"));
    assert!(asm.contains("@calmain"));
    assert!(asm.contains("func__main"));
    assert!(asm.ends_with("|e0000\n"));
}

#[test]
fn const_definition_is_resolved_as_a_literal_push() {
    let asm = compile("const N 42 N N");
    assert!(asm.contains("#002a"));
}

#[test]
fn let_and_set_share_the_same_local_slot() {
    let asm = compile("let u16 x 5 -> x x");
    assert!(asm.contains("STZ2"));
    assert!(asm.contains("STA2"));
    assert!(asm.contains("LDA2"));
}

#[test]
fn if_else_emits_both_branch_labels() {
    let asm = compile("if 1 then 2 else 3 end");
    assert!(asm.contains("if_1_1"));
    assert!(asm.contains("if_1_end"));
}

#[test]
fn while_loop_emits_condition_and_body_labels() {
    let asm = compile("let u16 i 0 while i do break end");
    assert!(asm.contains("while_1"));
    assert!(asm.contains("while_1_condition"));
    assert!(asm.contains("while_1_end"));
}

#[test]
fn struct_fields_resolve_to_offset_constants() {
    let asm = compile("struct Point u16 x u16 y end Point.x Point.y Point.sizeof");
    assert!(asm.contains("#0000"));
    assert!(asm.contains("#0002"));
    assert!(asm.contains("#0004"));
}

#[test]
fn enum_members_resolve_to_their_declared_or_implicit_values() {
    let asm = compile("enum Color : u8 Red Green = 5 Blue end Color.Red Color.Green Color.Blue");
    assert!(asm.contains("#0000"));
    assert!(asm.contains("#0005"));
    assert!(asm.contains("#0006"));
}

#[test]
fn inline_function_expands_at_every_call_site_without_a_call_instruction() {
    let asm = compile("inline twice begin 1 1 end func main begin twice twice end");
    assert!(!asm.contains(";func__twice"));
    assert!(asm.contains("func__main"));
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let code = Code::new("test.cal", b"break");
    let tokens = lexer::tokenize(&code).unwrap();
    let ast = parser::parse(&tokens).unwrap();
    let mut backend = UxnBackend::new();
    let err = lower(&mut backend, &ast).unwrap_err();
    assert!(err.to_string().contains("'break' used outside of a loop"));
}

#[test]
fn undefined_identifier_is_rejected_with_its_name() {
    let code = Code::new("test.cal", b"thisDoesNotExist");
    let tokens = lexer::tokenize(&code).unwrap();
    let ast = parser::parse(&tokens).unwrap();
    let mut backend = UxnBackend::new();
    let err = lower(&mut backend, &ast).unwrap_err();
    assert!(err.to_string().contains("thisDoesNotExist"));
}

#[test]
fn global_array_literal_surfaces_as_a_metadata_address() {
    let asm = compile("let array 3 u8 buf [ u8 1 2 3 ]");
    assert!(asm.contains("array_0"));
    assert!(asm.contains("array_0_meta"));
}
