use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

/// A single constant pool entry.
///
/// Floating point constants keep their raw IEEE bits so that parsing and
/// re-serializing a pool is lossless (and entries stay `Eq` for deduplication).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl Constant {
    fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => 1,
            Constant::Integer(_) => 3,
            Constant::Float(_) => 4,
            Constant::Long(_) => 5,
            Constant::Double(_) => 6,
            Constant::Class { .. } => 7,
            Constant::String { .. } => 8,
            Constant::FieldRef { .. } => 9,
            Constant::MethodRef { .. } => 10,
            Constant::InterfaceMethodRef { .. } => 11,
            Constant::NameAndType { .. } => 12,
            Constant::MethodHandle { .. } => 15,
            Constant::MethodType { .. } => 16,
            Constant::Dynamic { .. } => 17,
            Constant::InvokeDynamic { .. } => 18,
            Constant::Module { .. } => 19,
            Constant::Package { .. } => 20,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
        }
    }

    /// `Long` and `Double` take two constant pool slots.
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Constant pool with 1-based indexing. Slot 0 and the slot following every
/// wide constant are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![None],
        }
    }

    /// The `constant_pool_count` value as written in the class file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries: Vec<Option<Constant>> = Vec::with_capacity(count.max(1));
        entries.push(None);
        while entries.len() < count {
            let tag = reader.read_u1()?;
            let constant = match tag {
                1 => {
                    let len = reader.read_u2()? as usize;
                    Constant::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                3 => Constant::Integer(reader.read_u4()? as i32),
                4 => Constant::Float(reader.read_u4()?),
                5 => Constant::Long(reader.read_u8()? as i64),
                6 => Constant::Double(reader.read_u8()?),
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                8 => Constant::String {
                    string_index: reader.read_u2()?,
                },
                9 => Constant::FieldRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                10 => Constant::MethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                12 => Constant::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                15 => Constant::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                16 => Constant::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                17 => Constant::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                19 => Constant::Module {
                    name_index: reader.read_u2()?,
                },
                20 => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(Error::InvalidConstantPoolTag(other)),
            };
            let wide = constant.is_wide();
            entries.push(Some(constant));
            if wide {
                entries.push(None);
            }
        }
        // A trailing wide constant may push us one past `count`; that is a malformed pool.
        if entries.len() != count.max(1) {
            return Err(Error::MalformedAttribute("constant_pool"));
        }
        Ok(Self { entries })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_u2(self.count());
        for entry in self.entries.iter().flatten() {
            w.write_u1(entry.tag());
            match entry {
                Constant::Utf8(text) => {
                    let bytes = encode_modified_utf8(text)?;
                    w.write_u2(bytes.len() as u16);
                    w.write_bytes(&bytes);
                }
                Constant::Integer(v) => w.write_u4(*v as u32),
                Constant::Float(bits) => w.write_u4(*bits),
                Constant::Long(v) => w.write_u8(*v as u64),
                Constant::Double(bits) => w.write_u8(*bits),
                Constant::Class { name_index }
                | Constant::String {
                    string_index: name_index,
                }
                | Constant::MethodType {
                    descriptor_index: name_index,
                }
                | Constant::Module { name_index }
                | Constant::Package { name_index } => w.write_u2(*name_index),
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                }
                | Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                }
                | Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    w.write_u2(*class_index);
                    w.write_u2(*name_and_type_index);
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    w.write_u2(*name_index);
                    w.write_u2(*descriptor_index);
                }
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    w.write_u1(*reference_kind);
                    w.write_u2(*reference_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
                | Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    w.write_u2(*bootstrap_method_attr_index);
                    w.write_u2(*name_and_type_index);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            other => Err(Error::ConstantPoolTypeMismatch {
                index,
                expected: "Utf8",
                found: other.kind_name(),
            }),
        }
    }

    /// Internal name (`com/example/Foo`) of the `Class` constant at `index`.
    pub fn get_class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.get_utf8(*name_index),
            other => Err(Error::ConstantPoolTypeMismatch {
                index,
                expected: "Class",
                found: other.kind_name(),
            }),
        }
    }

    pub fn add_utf8(&mut self, text: &str) -> Result<u16> {
        self.intern(Constant::Utf8(text.to_string()))
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.add_utf8(internal_name)?;
        self.intern(Constant::Class { name_index })
    }

    pub fn add_string(&mut self, text: &str) -> Result<u16> {
        let string_index = self.add_utf8(text)?;
        self.intern(Constant::String { string_index })
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.intern(Constant::Integer(value))
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.intern(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Add a `Methodref` (or `InterfaceMethodref` when `interface` is set).
    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        let constant = if interface {
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            }
        } else {
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
        };
        self.intern(constant)
    }

    /// Return the index of an equal existing entry, or append `constant`.
    fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.as_ref() == Some(&constant))
        {
            return Ok(index as u16);
        }

        let slots = if constant.is_wide() { 2 } else { 1 };
        let index = self.entries.len();
        if index + slots > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow);
        }
        let wide = constant.is_wide();
        self.entries.push(Some(constant));
        if wide {
            self.entries.push(None);
        }
        Ok(index as u16)
    }
}

fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0 {
            return Err(Error::InvalidModifiedUtf8);
        }
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1).ok_or(Error::InvalidModifiedUtf8)?;
            if b2 & 0xC0 != 0x80 {
                return Err(Error::InvalidModifiedUtf8);
            }
            units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1).ok_or(Error::InvalidModifiedUtf8)?;
            let b3 = *bytes.get(i + 2).ok_or(Error::InvalidModifiedUtf8)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return Err(Error::InvalidModifiedUtf8);
            }
            units.push(
                (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
            );
            i += 3;
        } else {
            return Err(Error::InvalidModifiedUtf8);
        }
    }
    String::from_utf16(&units).map_err(|_| Error::InvalidModifiedUtf8)
}

fn encode_modified_utf8(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    if out.len() > u16::MAX as usize {
        return Err(Error::Unsupported(format!(
            "UTF-8 constant of {} bytes exceeds the class-file limit",
            out.len()
        )));
    }
    Ok(out)
}
