//! WebAssembly-Text rendering of a translated module.

use std::fmt::Write;

use crate::translator::wat_ast::{Instr, WatFunction, WatModule};

/// Type of every defined function, named so `call_indirect` can refer to it
const VOID_TYPE: &str = "$void";

pub fn generate_wat(module: &WatModule) -> String {
    let mut wat = String::from("(module\n");

    line(&mut wat, 1, &format!("(type {} (func))", VOID_TYPE));

    for import in &module.imports {
        let mut signature = String::new();
        if !import.params.is_empty() {
            let params: Vec<_> = import.params.iter().map(|p| p.name()).collect();
            let _ = write!(signature, " (param {})", params.join(" "));
        }
        if let Some(result) = import.result {
            let _ = write!(signature, " (result {})", result.name());
        }

        line(
            &mut wat,
            1,
            &format!(
                "(import \"{}\" \"{}\" (func ${}{}))",
                import.module, import.name, import.name, signature
            ),
        );
    }

    line(
        &mut wat,
        1,
        &format!("(memory (export \"memory\") {})", module.memory_pages),
    );

    for global in &module.globals {
        let name = global.register.name();
        let export = if global.export {
            format!(" (export \"{}\")", name)
        } else {
            String::new()
        };

        line(
            &mut wat,
            1,
            &format!("(global ${}{} (mut i32) (i32.const {}))", name, export, global.init),
        );
    }

    let table_size = module.function_table.len();
    line(&mut wat, 1, &format!("(table (export \"table\") {} {} funcref)", table_size, table_size));
    if !module.function_table.is_empty() {
        let entries: Vec<_> = module
            .function_table
            .iter()
            .map(|name| format!("${}", name))
            .collect();
        line(
            &mut wat,
            1,
            &format!("(elem (i32.const 0) func {})", entries.join(" ")),
        );
    }

    if !module.data_segment.is_empty() {
        line(
            &mut wat,
            1,
            &format!("(data (i32.const 0) \"{}\")", escape(&module.data_segment)),
        );
    }

    for function in &module.functions {
        write_function(&mut wat, function);
    }

    wat.push_str(")\n");
    wat
}

fn write_function(wat: &mut String, function: &WatFunction) {
    let export = if function.export {
        format!(" (export \"{}\")", function.name)
    } else {
        String::new()
    };
    line(wat, 1, &format!("(func ${}{}", function.name, export));

    if !function.locals.is_empty() {
        let locals: Vec<_> = function.locals.iter().map(|local| local.name()).collect();
        line(wat, 2, &format!("(local {})", locals.join(" ")));
    }

    write_body(wat, &function.body, 2);
    line(wat, 1, ")");
}

fn write_body(wat: &mut String, body: &[Instr], depth: usize) {
    for instr in body {
        write_instr(wat, instr, depth);
    }
}

fn write_instr(wat: &mut String, instr: &Instr, depth: usize) {
    let text = match instr {
        Instr::Block { label, body } | Instr::Loop { label, body } => {
            let keyword = if matches!(instr, Instr::Block { .. }) {
                "block"
            } else {
                "loop"
            };

            line(wat, depth, &format!("{} ${}", keyword, label));
            write_body(wat, body, depth + 1);
            line(wat, depth, "end");
            return;
        }
        Instr::If {
            result,
            then_body,
            else_body,
        } => {
            match result {
                Some(result) => line(wat, depth, &format!("if (result {})", result.name())),
                None => line(wat, depth, "if"),
            }
            write_body(wat, then_body, depth + 1);
            if !else_body.is_empty() {
                line(wat, depth, "else");
                write_body(wat, else_body, depth + 1);
            }
            line(wat, depth, "end");
            return;
        }

        Instr::I32Const(value) => format!("i32.const {}", value),
        Instr::I64Const(value) => format!("i64.const {}", value),
        Instr::F32Const(value) => format!("f32.const {}", float(f64::from(*value))),
        Instr::F64Const(value) => format!("f64.const {}", float(*value)),
        Instr::LocalGet(index) => format!("local.get {}", index),
        Instr::LocalSet(index) => format!("local.set {}", index),
        Instr::LocalTee(index) => format!("local.tee {}", index),
        Instr::GlobalGet(register) => format!("global.get ${}", register.name()),
        Instr::GlobalSet(register) => format!("global.set ${}", register.name()),
        Instr::Load { op, offset } | Instr::Store { op, offset } => {
            if *offset > 0 {
                format!("{} offset={}", op.name(), offset)
            } else {
                op.name().to_string()
            }
        }
        Instr::Numeric(op) => op.name().to_string(),
        Instr::Br(label) => format!("br ${}", label),
        Instr::BrIf(label) => format!("br_if ${}", label),
        Instr::BrTable { labels, default } => {
            let mut text = String::from("br_table");
            for label in labels.iter().chain([default]) {
                let _ = write!(text, " ${}", label);
            }
            text
        }
        Instr::Call(name) => format!("call ${}", name),
        Instr::CallIndirect => format!("call_indirect (type {})", VOID_TYPE),
        Instr::Return => "return".to_string(),
        Instr::Drop => "drop".to_string(),
        Instr::Select => "select".to_string(),
        Instr::Unreachable => "unreachable".to_string(),
        Instr::MemorySize => "memory.size".to_string(),
        Instr::MemoryGrow => "memory.grow".to_string(),
    };

    line(wat, depth, &text);
}

fn line(wat: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        wat.push('\t');
    }
    wat.push_str(text);
    wat.push('\n');
}

fn float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Every byte as a `\xx` escape.
fn escape(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(escaped, "\\{:02x}", byte);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::parser::parse_program, processor::processor::process,
        translator::translator::translate,
    };

    fn wat_of(source: &str) -> String {
        let program = process(&parse_program(source).unwrap()).unwrap();
        generate_wat(&translate(&program, 1).unwrap())
    }

    #[test]
    fn module_header_declares_memory_and_registers() {
        let wat = wat_of("int x = 5; int main(void) { return x; }");

        assert!(wat.starts_with("(module\n\t(type $void (func))\n"));
        assert!(wat.contains("\t(memory (export \"memory\") 1)\n"));
        assert!(wat.contains("\t(global $sp (export \"sp\") (mut i32) (i32.const 65528))\n"));
        assert!(wat.contains("\t(global $bp (export \"bp\") (mut i32) (i32.const 65528))\n"));
        assert!(wat.contains("\t(global $hp (export \"hp\") (mut i32) (i32.const 4))\n"));
        assert!(wat.contains("\t(global $r1 (mut i32) (i32.const 0))\n"));
        assert!(wat.contains("\t(data (i32.const 0) \"\\05\\00\\00\\00\")\n"));
        assert!(wat.contains("\t(func $main (export \"main\")\n"));
        assert!(wat.ends_with(")\n"));
    }

    #[test]
    fn imports_carry_their_signature() {
        let wat = wat_of("int main(void) { print_double(1.5); return 0; }");
        assert!(wat.contains(
            "\t(import \"source_stdlib\" \"print_double\" (func $print_double (param f64)))\n"
        ));
        assert!(wat.contains("\t\tf64.const 1.5\n\t\tcall $print_double\n"));
    }

    #[test]
    fn nested_blocks_are_indented() {
        let wat = wat_of("int main(void) { int i = 0; while (i < 2) i++; return i; }");
        assert!(wat.contains("\t\tblock $block_0\n\t\t\tloop $loop_1\n"));
        assert!(wat.contains("\t\t\t\tbr_if $block_0\n"));
        assert!(wat.contains("\t\t\t\tbr $loop_1\n\t\t\tend\n\t\tend\n"));
    }

    #[test]
    fn function_pointers_fill_the_table() {
        let wat = wat_of(
            "int one(void) { return 1; } int main(void) { int (*f)(void) = one; return f(); }",
        );
        assert!(wat.contains("\t(table (export \"table\") 1 1 funcref)\n"));
        assert!(wat.contains("\t(elem (i32.const 0) func $one)\n"));
        assert!(wat.contains("call_indirect (type $void)"));
    }

    #[test]
    fn floats_and_escapes() {
        assert_eq!(float(2.0), "2.0");
        assert_eq!(float(f64::NEG_INFINITY), "-inf");
        assert_eq!(escape(&[0, 255, b'a']), "\\00\\ff\\61");
    }
}
