use crate::classfile::{write_attributes, write_count, Attribute};
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

pub(crate) const MAX_CODE_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Zero for a catch-all (`finally`) handler.
    pub catch_type: u16,
}

/// A decoded `Code` attribute. Nested attributes stay raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Code {
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(info);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_len = reader.read_u4()? as usize;
        if code_len == 0 || code_len > MAX_CODE_LEN {
            return Err(Error::MalformedAttribute("Code"));
        }
        let code = reader.read_bytes(code_len)?.to_vec();

        let handlers = reader.read_u2()? as usize;
        let mut exception_table = Vec::with_capacity(handlers);
        for _ in 0..handlers {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u2()?,
                end_pc: reader.read_u2()?,
                handler_pc: reader.read_u2()?,
                catch_type: reader.read_u2()?,
            });
        }

        let count = reader.read_u2()? as usize;
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            let name_index = reader.read_u2()?;
            let len = reader.read_u4()? as usize;
            attributes.push(Attribute {
                name_index,
                info: reader.read_bytes(len)?.to_vec(),
            });
        }
        reader.ensure_empty()?;

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.len() > MAX_CODE_LEN {
            return Err(Error::CodeTooLarge(self.code.len()));
        }
        let mut w = Writer::new();
        w.write_u2(self.max_stack);
        w.write_u2(self.max_locals);
        w.write_u4(self.code.len() as u32);
        w.write_bytes(&self.code);
        write_count(&mut w, self.exception_table.len(), "exception handlers")?;
        for handler in &self.exception_table {
            w.write_u2(handler.start_pc);
            w.write_u2(handler.end_pc);
            w.write_u2(handler.handler_pc);
            w.write_u2(handler.catch_type);
        }
        write_attributes(&mut w, &self.attributes)?;
        Ok(w.into_vec())
    }
}
