//! Synthetic `public static` bridges that expose private members of a class.
//!
//! Code compiled against the running application calls
//! `Owner.access$hotwire$read$secret(owner)` instead of touching `owner.secret`
//! directly, so the dynamic compiler never needs private access.

use crate::classfile::{access, ClassFile};
use crate::code::Code;
use crate::descriptor::{
    parse_field_descriptor, parse_method_descriptor, BaseType, FieldType, ReturnType,
};
use crate::error::{Error, Result};
use crate::opcodes::{
    ALOAD, ARETURN, DLOAD, DRETURN, FLOAD, FRETURN, GETFIELD, GETSTATIC, ILOAD, INVOKEINTERFACE,
    INVOKESPECIAL, INVOKESTATIC, INVOKEVIRTUAL, IRETURN, LLOAD, LRETURN, PUTFIELD, PUTSTATIC,
    RETURN, WIDE,
};

pub const ACCESSOR_PREFIX: &str = "access$hotwire$";

/// The private member an accessor should expose.
///
/// `descriptor` disambiguates overloads; without it the first member with a
/// matching name is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    FieldRead {
        name: String,
        descriptor: Option<String>,
    },
    FieldWrite {
        name: String,
        descriptor: Option<String>,
    },
    MethodCall {
        name: String,
        descriptor: Option<String>,
    },
}

/// Name and descriptor of a generated (or already present) accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorRef {
    pub name: String,
    pub descriptor: String,
}

/// Add a `public static synthetic` accessor for `member` to `class`.
///
/// Adding the same accessor twice returns the existing one unchanged.
pub fn add_accessor(class: &mut ClassFile, member: &MemberRef) -> Result<AccessorRef> {
    let plan = match member {
        MemberRef::FieldRead { name, descriptor } => {
            field_plan(class, name, descriptor.as_deref(), FieldOp::Read)?
        }
        MemberRef::FieldWrite { name, descriptor } => {
            field_plan(class, name, descriptor.as_deref(), FieldOp::Write)?
        }
        MemberRef::MethodCall { name, descriptor } => {
            method_plan(class, name, descriptor.as_deref())?
        }
    };

    let accessor = AccessorRef {
        name: plan.name,
        descriptor: plan.descriptor,
    };
    if class
        .find_method(&accessor.name, Some(&accessor.descriptor))?
        .is_some()
    {
        return Ok(accessor);
    }

    class.add_method(
        access::PUBLIC | access::STATIC | access::SYNTHETIC,
        &accessor.name,
        &accessor.descriptor,
        &plan.code,
    )?;
    Ok(accessor)
}

struct Plan {
    name: String,
    descriptor: String,
    code: Code,
}

#[derive(Clone, Copy)]
enum FieldOp {
    Read,
    Write,
}

fn field_plan(
    class: &mut ClassFile,
    name: &str,
    descriptor: Option<&str>,
    op: FieldOp,
) -> Result<Plan> {
    let index = class
        .find_field(name, descriptor)?
        .ok_or_else(|| not_found(name, descriptor))?;
    let field = &class.fields[index];
    let is_static = field.is_static();
    let field_desc = class.member_descriptor(field)?.to_string();
    let field_type = parse_field_descriptor(&field_desc)?;
    let owner = class.class_name()?.to_string();
    let owner_desc = format!("L{owner};");

    let field_ref = class
        .constant_pool
        .add_field_ref(&owner, name, &field_desc)?;
    let mut asm = Assembler::default();

    let (accessor_name, accessor_desc) = match op {
        FieldOp::Read => {
            if is_static {
                asm.op_u2(GETSTATIC, field_ref);
            } else {
                asm.load(&FieldType::Object(owner.clone()), 0);
                asm.op_u2(GETFIELD, field_ref);
            }
            asm.ret(&ReturnType::Type(field_type.clone()));
            let params = if is_static { String::new() } else { owner_desc };
            (
                format!("{ACCESSOR_PREFIX}read${name}"),
                format!("({params}){field_desc}"),
            )
        }
        FieldOp::Write => {
            if is_static {
                asm.load(&field_type, 0);
                asm.op_u2(PUTSTATIC, field_ref);
            } else {
                asm.load(&FieldType::Object(owner.clone()), 0);
                asm.load(&field_type, 1);
                asm.op_u2(PUTFIELD, field_ref);
            }
            asm.ret(&ReturnType::Void);
            let params = if is_static {
                field_desc.clone()
            } else {
                format!("{owner_desc}{field_desc}")
            };
            (
                format!("{ACCESSOR_PREFIX}write${name}"),
                format!("({params})V"),
            )
        }
    };

    let receiver = if is_static { 0 } else { 1 };
    let slots = field_type.slots();
    let (max_stack, max_locals) = match op {
        FieldOp::Read => (slots.max(receiver), receiver),
        FieldOp::Write => (receiver + slots, receiver + slots),
    };

    Ok(Plan {
        name: accessor_name,
        descriptor: accessor_desc,
        code: asm.finish(max_stack, max_locals),
    })
}

fn method_plan(class: &mut ClassFile, name: &str, descriptor: Option<&str>) -> Result<Plan> {
    if name.starts_with('<') {
        return Err(Error::Unsupported(format!(
            "accessors for {name} are not supported"
        )));
    }
    let index = class
        .find_method(name, descriptor)?
        .ok_or_else(|| not_found(name, descriptor))?;
    let method = &class.methods[index];
    let is_static = method.is_static();
    let is_private = method.is_private();
    let method_desc_text = class.member_descriptor(method)?.to_string();
    let method_desc = parse_method_descriptor(&method_desc_text)?;
    let interface = class.is_interface();
    let owner = class.class_name()?.to_string();

    let method_ref =
        class
            .constant_pool
            .add_method_ref(&owner, name, &method_desc_text, interface)?;

    let mut asm = Assembler::default();
    let mut local = 0u16;
    if !is_static {
        asm.load(&FieldType::Object(owner.clone()), 0);
        local = 1;
    }
    for param in &method_desc.params {
        asm.load(param, local);
        local += param.slots();
    }

    if is_static {
        asm.op_u2(INVOKESTATIC, method_ref);
    } else if is_private {
        asm.op_u2(INVOKESPECIAL, method_ref);
    } else if interface {
        asm.op_u2(INVOKEINTERFACE, method_ref);
        // invokeinterface carries the argument slot count (receiver included) and a zero byte.
        asm.bytes.push(local as u8);
        asm.bytes.push(0);
    } else {
        asm.op_u2(INVOKEVIRTUAL, method_ref);
    }
    asm.ret(&method_desc.return_type);

    let return_slots = match &method_desc.return_type {
        ReturnType::Void => 0,
        ReturnType::Type(ty) => ty.slots(),
    };
    let receiver_desc = if is_static {
        String::new()
    } else {
        format!("L{owner};")
    };
    let params_text = method_desc_text
        .strip_prefix('(')
        .ok_or_else(|| Error::InvalidDescriptor(method_desc_text.clone()))?;

    Ok(Plan {
        name: format!("{ACCESSOR_PREFIX}invoke${name}"),
        descriptor: format!("({receiver_desc}{params_text}"),
        code: asm.finish(local.max(return_slots), local),
    })
}

fn not_found(name: &str, descriptor: Option<&str>) -> Error {
    Error::MemberNotFound {
        name: name.to_string(),
        descriptor: descriptor.unwrap_or("*").to_string(),
    }
}

#[derive(Default)]
struct Assembler {
    bytes: Vec<u8>,
}

impl Assembler {
    fn op_u2(&mut self, opcode: u8, operand: u16) {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
    }

    fn load(&mut self, ty: &FieldType, local: u16) {
        let opcode = match ty {
            FieldType::Base(BaseType::Long) => LLOAD,
            FieldType::Base(BaseType::Float) => FLOAD,
            FieldType::Base(BaseType::Double) => DLOAD,
            FieldType::Base(_) => ILOAD,
            FieldType::Object(_) | FieldType::Array(_) => ALOAD,
        };
        match u8::try_from(local) {
            Ok(index) => self.bytes.extend_from_slice(&[opcode, index]),
            Err(_) => {
                self.bytes.extend_from_slice(&[WIDE, opcode]);
                self.bytes.extend_from_slice(&local.to_be_bytes());
            }
        }
    }

    fn ret(&mut self, ty: &ReturnType) {
        self.bytes.push(match ty {
            ReturnType::Void => RETURN,
            ReturnType::Type(FieldType::Base(BaseType::Long)) => LRETURN,
            ReturnType::Type(FieldType::Base(BaseType::Float)) => FRETURN,
            ReturnType::Type(FieldType::Base(BaseType::Double)) => DRETURN,
            ReturnType::Type(FieldType::Base(_)) => IRETURN,
            ReturnType::Type(_) => ARETURN,
        });
    }

    fn finish(self, max_stack: u16, max_locals: u16) -> Code {
        Code {
            max_stack,
            max_locals,
            code: self.bytes,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }
}
