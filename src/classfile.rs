use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;

use crate::ir::{CallKind, CallSite, Instruction, Method, Unit};
use crate::opcodes;

/// Result of decoding class-file bytes into a [`Unit`].
#[derive(Debug)]
pub(crate) enum Decoded {
    Complete(Unit),
    /// The unit name was recovered but decoding stopped early; `unit` holds
    /// the methods decoded before the failure.
    Partial { unit: Unit, error: anyhow::Error },
}

/// Decode class-file bytes. Errors only when not even the class name can be recovered.
pub(crate) fn parse_unit(data: &[u8]) -> Result<Decoded> {
    let class_file = match class_file::parse(data) {
        Ok(parsed) => parsed,
        Err(err) => {
            let name = parse_class_name_minimal(data).context("failed to parse class file bytes")?;
            return Ok(Decoded::Partial {
                unit: Unit::new(name),
                error: anyhow::Error::new(err).context("failed to parse class file bytes"),
            });
        }
    };
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let mut unit = Unit::new(name);

    for method in class_file.methods() {
        match parse_method(constant_pool, method) {
            Ok(Some(parsed)) => unit.methods.push(parsed),
            Ok(None) => {}
            Err(error) => return Ok(Decoded::Partial { unit, error }),
        }
    }

    Ok(Decoded::Complete(unit))
}

fn parse_method(
    constant_pool: &[ConstantPool],
    method: &jclassfile::methods::MethodInfo,
) -> Result<Option<Method>> {
    let name = resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
    let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
        .context("resolve method descriptor")?;
    let code = method
        .attributes()
        .iter()
        .find_map(|attribute| match attribute {
            jclassfile::attributes::Attribute::Code { code, .. } => Some(code),
            _ => None,
        });
    // Abstract and native methods carry no body to inspect.
    let Some(code) = code else {
        return Ok(None);
    };
    let instructions = parse_bytecode(code, constant_pool)
        .with_context(|| format!("parse bytecode of {name}{descriptor}"))?;
    Ok(Some(Method {
        name,
        descriptor,
        instructions,
    }))
}

fn parse_bytecode(code: &[u8], constant_pool: &[ConstantPool]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let start_offset = offset as u32;
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let instruction = match CallKind::from_opcode(opcode) {
            Some(kind) => {
                let method_index = read_u16(code, offset + 1)?;
                let call = resolve_method_ref(constant_pool, method_index, kind)
                    .context("resolve method ref")?;
                Instruction::invoke(start_offset, call)
            }
            None => Instruction::other(start_offset, opcode),
        };
        instructions.push(instruction);
        offset += length;
    }
    Ok(instructions)
}

fn resolve_method_ref(
    constant_pool: &[ConstantPool],
    index: u16,
    kind: CallKind,
) -> Result<CallSite> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing method ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected method ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve method name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve method descriptor")?;
    Ok(CallSite {
        owner,
        name,
        descriptor,
        kind,
    })
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

/// Walk the class header far enough to recover `this_class`.
fn parse_class_name_minimal(data: &[u8]) -> Result<String> {
    let mut offset = 0usize;
    let magic = read_u32_class(data, &mut offset)?;
    if magic != 0xCAFEBABE {
        anyhow::bail!("invalid class file magic");
    }
    let _minor = read_u16_class(data, &mut offset)?;
    let _major = read_u16_class(data, &mut offset)?;
    let (utf8_entries, class_entries) = parse_constant_pool_minimal(data, &mut offset)?;
    let _access_flags = read_u16_class(data, &mut offset)?;
    let this_class = read_u16_class(data, &mut offset)?;

    let name_index = class_entries
        .get(this_class as usize)
        .copied()
        .flatten()
        .context("missing class name index")?;
    match utf8_entries.get(name_index as usize) {
        Some(Some(value)) => Ok(value.clone()),
        _ => anyhow::bail!("missing utf8 entry for class name"),
    }
}

/// Collect Utf8 values and Class name indexes, skipping everything else.
fn parse_constant_pool_minimal(
    data: &[u8],
    offset: &mut usize,
) -> Result<(Vec<Option<String>>, Vec<Option<u16>>)> {
    let count = read_u16_class(data, offset)?;
    let mut utf8_entries = vec![None; count as usize];
    let mut class_entries = vec![None; count as usize];
    let mut index = 1u16;
    while index < count {
        let tag = read_u8_class(data, offset)?;
        match tag {
            1 => {
                let len = read_u16_class(data, offset)? as usize;
                let bytes = read_bytes_class(data, offset, len)?;
                utf8_entries[index as usize] = Some(String::from_utf8_lossy(bytes).to_string());
            }
            7 => {
                class_entries[index as usize] = Some(read_u16_class(data, offset)?);
            }
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => skip_class_bytes(data, offset, 4)?,
            5 | 6 => {
                skip_class_bytes(data, offset, 8)?;
                index += 1;
            }
            8 | 16 | 19 | 20 => skip_class_bytes(data, offset, 2)?,
            15 => skip_class_bytes(data, offset, 3)?,
            _ => anyhow::bail!("unsupported constant pool tag: {}", tag),
        }
        index += 1;
    }
    Ok((utf8_entries, class_entries))
}

fn read_u8_class(data: &[u8], offset: &mut usize) -> Result<u8> {
    let byte = *data.get(*offset).context("class file out of bounds")?;
    *offset += 1;
    Ok(byte)
}

fn read_u16_class(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = read_bytes_class(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32_class(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes = read_bytes_class(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_bytes_class<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let start = *offset;
    let end = start + len;
    let slice = data.get(start..end).context("class file out of bounds")?;
    *offset = end;
    Ok(slice)
}

fn skip_class_bytes(data: &[u8], offset: &mut usize, len: usize) -> Result<()> {
    read_bytes_class(data, offset, len)?;
    Ok(())
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode i32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{ClassBuilder, Op, ret, string_contains};
    use super::*;

    #[test]
    fn decodes_invocations_and_opaque_instructions() {
        let bytes = ClassBuilder::new("com/example/App")
            .method(
                "run",
                "(Ljava/lang/String;)V",
                &[
                    Op::Plain(opcodes::ALOAD_1),
                    Op::Plain(opcodes::ALOAD_1),
                    string_contains(),
                    Op::Plain(opcodes::POP),
                    ret(),
                ],
            )
            .build();

        let decoded = parse_unit(&bytes).expect("decode class");
        let Decoded::Complete(unit) = decoded else {
            panic!("expected complete decode");
        };

        assert_eq!(unit.name, "com/example/App");
        assert_eq!(unit.methods.len(), 1);
        let method = &unit.methods[0];
        assert_eq!(method.name, "run");
        assert_eq!(method.descriptor, "(Ljava/lang/String;)V");
        assert_eq!(method.instructions.len(), 5);
        let call = method.instructions[2].call_site().expect("invoke");
        assert_eq!(call.owner, "java/lang/String");
        assert_eq!(call.name, "contains");
        assert_eq!(call.descriptor, "(Ljava/lang/CharSequence;)Z");
        assert_eq!(call.kind, CallKind::Virtual);
        assert_eq!(method.instructions[2].offset, 2);
        assert_eq!(method.instructions[3].offset, 5);
        assert_eq!(method.instructions[4].opcode, opcodes::RETURN);
    }

    #[test]
    fn decodes_interface_calls() {
        let bytes = ClassBuilder::new("com/example/App")
            .method(
                "size",
                "(Ljava/util/List;)I",
                &[
                    Op::Plain(opcodes::ALOAD_0),
                    Op::Invoke {
                        kind: CallKind::Interface,
                        owner: "java/util/List",
                        name: "size",
                        descriptor: "()I",
                    },
                    Op::Plain(opcodes::IRETURN),
                ],
            )
            .build();

        let Decoded::Complete(unit) = parse_unit(&bytes).expect("decode class") else {
            panic!("expected complete decode");
        };

        let call = unit.methods[0].instructions[1].call_site().expect("invoke");
        assert_eq!(call.kind, CallKind::Interface);
        assert_eq!(unit.methods[0].instructions[2].offset, 6);
    }

    #[test]
    fn recovers_name_when_body_is_truncated() {
        let mut bytes = ClassBuilder::new("com/example/Broken")
            .method("run", "()V", &[ret()])
            .build();
        bytes.truncate(bytes.len() - 8);

        let decoded = parse_unit(&bytes).expect("name recovered");

        let Decoded::Partial { unit, .. } = decoded else {
            panic!("expected partial decode");
        };
        assert_eq!(unit.name, "com/example/Broken");
        assert!(unit.methods.is_empty());
    }

    #[test]
    fn rejects_bytes_without_recoverable_name() {
        assert!(parse_unit(b"nope").is_err());
        assert!(parse_unit(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]).is_err());
    }

    #[test]
    fn keeps_methods_decoded_before_bad_bytecode() {
        let bytes = ClassBuilder::new("com/example/Mixed")
            .method("good", "()V", &[ret()])
            .method("bad", "()V", &[Op::Plain(0xcb)])
            .method("later", "()V", &[ret()])
            .build();

        let decoded = parse_unit(&bytes).expect("name recovered");

        let Decoded::Partial { unit, .. } = decoded else {
            panic!("expected partial decode");
        };
        assert_eq!(unit.name, "com/example/Mixed");
        let names: Vec<_> = unit.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn opcode_length_handles_switch_padding() {
        // tableswitch at offset 1: 2 padding bytes, default, low=0, high=1, two targets.
        let mut code = vec![opcodes::NOP, opcodes::TABLESWITCH, 0, 0];
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());

        assert_eq!(opcode_length(&code, 1).expect("length"), 1 + 2 + 12 + 8);
        assert_eq!(
            opcode_length(&[opcodes::WIDE, opcodes::IINC, 0, 1, 0, 1], 0).expect("length"),
            6
        );
    }
}
