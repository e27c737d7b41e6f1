use crate::code::Code;
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

const MAGIC: u32 = 0xCAFE_BABE;

/// `access_flags` bits used by the editor.
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
}

/// An attribute kept as raw bytes. Only `Code` is ever decoded, on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    pub fn is_private(&self) -> bool {
        self.access_flags & access::PRIVATE != 0
    }

    pub fn is_public(&self) -> bool {
        self.access_flags & access::PUBLIC != 0
    }
}

/// A class file that can be edited and written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    /// Zero for `java/lang/Object` and module descriptors.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u4()?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        constant_pool.get_class_name(this_class)?;
        let super_class = reader.read_u2()?;
        if super_class != 0 {
            constant_pool.get_class_name(super_class)?;
        }

        let interfaces_count = reader.read_u2()? as usize;
        let mut interfaces = Vec::with_capacity(interfaces_count);
        for _ in 0..interfaces_count {
            let index = reader.read_u2()?;
            constant_pool.get_class_name(index)?;
            interfaces.push(index);
        }

        let fields = parse_members(&mut reader, &constant_pool)?;
        let methods = parse_members(&mut reader, &constant_pool)?;
        let attributes = parse_attributes(&mut reader, &constant_pool)?;

        reader.ensure_empty()?;

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.write_u4(MAGIC);
        w.write_u2(self.minor_version);
        w.write_u2(self.major_version);
        self.constant_pool.write(&mut w)?;
        w.write_u2(self.access_flags);
        w.write_u2(self.this_class);
        w.write_u2(self.super_class);
        write_count(&mut w, self.interfaces.len(), "interfaces")?;
        for index in &self.interfaces {
            w.write_u2(*index);
        }
        write_members(&mut w, &self.fields)?;
        write_members(&mut w, &self.methods)?;
        write_attributes(&mut w, &self.attributes)?;
        Ok(w.into_vec())
    }

    /// Internal name of this class (`com/example/Foo`).
    pub fn class_name(&self) -> Result<&str> {
        self.constant_pool.get_class_name(self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.get_class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|index| self.constant_pool.get_class_name(*index))
            .collect()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    pub fn member_name(&self, member: &Member) -> Result<&str> {
        self.constant_pool.get_utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &Member) -> Result<&str> {
        self.constant_pool.get_utf8(member.descriptor_index)
    }

    /// `(name, descriptor)` of every declared field, in declaration order.
    pub fn field_signatures(&self) -> Result<Vec<(String, String)>> {
        self.signatures(&self.fields)
    }

    /// `(name, descriptor)` of every declared method, in declaration order.
    pub fn method_signatures(&self) -> Result<Vec<(String, String)>> {
        self.signatures(&self.methods)
    }

    fn signatures(&self, members: &[Member]) -> Result<Vec<(String, String)>> {
        members
            .iter()
            .map(|m| {
                Ok((
                    self.member_name(m)?.to_string(),
                    self.member_descriptor(m)?.to_string(),
                ))
            })
            .collect()
    }

    /// Find a field by name, and by descriptor when one is given.
    pub fn find_field(&self, name: &str, descriptor: Option<&str>) -> Result<Option<usize>> {
        find_member(self, &self.fields, name, descriptor)
    }

    /// Find a method by name, and by descriptor when one is given.
    pub fn find_method(&self, name: &str, descriptor: Option<&str>) -> Result<Option<usize>> {
        find_member(self, &self.methods, name, descriptor)
    }

    /// Decode the `Code` attribute of `method`, if it has one.
    pub fn code(&self, method: &Member) -> Result<Option<Code>> {
        for attr in &method.attributes {
            if self.constant_pool.get_utf8(attr.name_index)? == "Code" {
                return Code::parse(&attr.info).map(Some);
            }
        }
        Ok(None)
    }

    /// Replace (or add) the `Code` attribute of the method at `method_index`.
    pub fn set_code(&mut self, method_index: usize, code: &Code) -> Result<()> {
        let name_index = self.constant_pool.add_utf8("Code")?;
        let info = code.to_bytes()?;
        let method = self
            .methods
            .get_mut(method_index)
            .ok_or_else(|| Error::Unsupported(format!("no method at index {method_index}")))?;
        match method
            .attributes
            .iter_mut()
            .find(|attr| attr.name_index == name_index)
        {
            Some(attr) => attr.info = info,
            None => method.attributes.push(Attribute { name_index, info }),
        }
        Ok(())
    }

    /// Append a method with the given code and return its index.
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: &Code,
    ) -> Result<usize> {
        let name_index = self.constant_pool.add_utf8(name)?;
        let descriptor_index = self.constant_pool.add_utf8(descriptor)?;
        self.methods.push(Member {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        let index = self.methods.len() - 1;
        self.set_code(index, code)?;
        Ok(index)
    }
}

fn find_member(
    class: &ClassFile,
    members: &[Member],
    name: &str,
    descriptor: Option<&str>,
) -> Result<Option<usize>> {
    for (index, member) in members.iter().enumerate() {
        if class.member_name(member)? != name {
            continue;
        }
        match descriptor {
            Some(desc) if class.member_descriptor(member)? != desc => continue,
            _ => return Ok(Some(index)),
        }
    }
    Ok(None)
}

fn parse_members(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<Member>> {
    let count = reader.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name_index = reader.read_u2()?;
        let descriptor_index = reader.read_u2()?;
        cp.get_utf8(name_index)?;
        cp.get_utf8(descriptor_index)?;
        let attributes = parse_attributes(reader, cp)?;
        members.push(Member {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(members)
}

pub(crate) fn parse_attributes(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
) -> Result<Vec<Attribute>> {
    let count = reader.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        cp.get_utf8(name_index)?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?.to_vec();
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

fn write_members(w: &mut Writer, members: &[Member]) -> Result<()> {
    write_count(w, members.len(), "members")?;
    for member in members {
        w.write_u2(member.access_flags);
        w.write_u2(member.name_index);
        w.write_u2(member.descriptor_index);
        write_attributes(w, &member.attributes)?;
    }
    Ok(())
}

pub(crate) fn write_attributes(w: &mut Writer, attributes: &[Attribute]) -> Result<()> {
    write_count(w, attributes.len(), "attributes")?;
    for attr in attributes {
        w.write_u2(attr.name_index);
        let len = u32::try_from(attr.info.len())
            .map_err(|_| Error::Unsupported("attribute larger than 4 GiB".to_string()))?;
        w.write_u4(len);
        w.write_bytes(&attr.info);
    }
    Ok(())
}

pub(crate) fn write_count(w: &mut Writer, count: usize, what: &str) -> Result<()> {
    let count = u16::try_from(count)
        .map_err(|_| Error::Unsupported(format!("too many {what}: {count}")))?;
    w.write_u2(count);
    Ok(())
}
