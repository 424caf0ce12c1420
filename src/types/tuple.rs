#![forbid(unsafe_code)]

//! Typed field values, schemas, and tuples with their fixed-width encoding.

use std::fmt;

use super::{RecordId, Result, TesseraError};

/// Maximum number of bytes a string field can hold.
pub const STRING_LEN: usize = 128;

/// Column type. Every type has a fixed on-page width.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FieldType {
    /// 32-bit signed integer, big-endian on disk.
    Int,
    /// UTF-8 string of at most [`STRING_LEN`] bytes, length-prefixed and zero padded.
    Str,
}

impl FieldType {
    /// Bytes this type occupies inside a slot.
    pub const fn byte_len(self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }

    /// Decodes one value of this type from the front of `src`.
    pub fn decode(self, src: &[u8]) -> Result<Field> {
        if src.len() < self.byte_len() {
            return Err(TesseraError::Corruption("field truncated"));
        }
        match self {
            FieldType::Int => {
                let raw: [u8; 4] = src[..4]
                    .try_into()
                    .map_err(|_| TesseraError::Corruption("field truncated"))?;
                Ok(Field::Int(i32::from_be_bytes(raw)))
            }
            FieldType::Str => {
                let raw: [u8; 4] = src[..4]
                    .try_into()
                    .map_err(|_| TesseraError::Corruption("field truncated"))?;
                let len = u32::from_be_bytes(raw) as usize;
                if len > STRING_LEN {
                    return Err(TesseraError::Corruption("string length exceeds field width"));
                }
                let text = std::str::from_utf8(&src[4..4 + len])
                    .map_err(|_| TesseraError::Corruption("string field is not utf-8"))?;
                Ok(Field::Str(text.to_owned()))
            }
        }
    }
}

/// A single column value.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Field {
    /// Integer value.
    Int(i32),
    /// String value.
    Str(String),
}

impl Field {
    /// Type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(*v),
            Field::Str(_) => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            Field::Int(_) => None,
        }
    }

    /// Writes the fixed-width encoding into `dst`, which must be exactly `byte_len` long.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        let width = self.field_type().byte_len();
        if dst.len() != width {
            return Err(TesseraError::Invalid("field buffer has wrong width"));
        }
        match self {
            Field::Int(v) => dst.copy_from_slice(&v.to_be_bytes()),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > STRING_LEN {
                    return Err(TesseraError::Invalid("string longer than field width"));
                }
                dst[..4].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
                dst[4..4 + bytes.len()].copy_from_slice(bytes);
                dst[4 + bytes.len()..].fill(0);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => f.write_str(s),
        }
    }
}

/// One column of a schema.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TupleDescItem {
    /// Column type.
    pub field_type: FieldType,
    /// Optional column name.
    pub name: Option<String>,
}

/// Ordered list of column types and names.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TupleDesc {
    items: Vec<TupleDescItem>,
}

impl TupleDesc {
    /// Builds a schema from parallel type and name lists.
    pub fn new(types: &[FieldType], names: &[&str]) -> Result<Self> {
        if types.is_empty() {
            return Err(TesseraError::Invalid("schema needs at least one field"));
        }
        if types.len() != names.len() {
            return Err(TesseraError::Invalid("schema types and names differ in length"));
        }
        let items = types
            .iter()
            .zip(names)
            .map(|(ty, name)| TupleDescItem {
                field_type: *ty,
                name: Some((*name).to_owned()),
            })
            .collect();
        Ok(Self { items })
    }

    /// Builds a schema with anonymous columns.
    pub fn from_types(types: &[FieldType]) -> Result<Self> {
        if types.is_empty() {
            return Err(TesseraError::Invalid("schema needs at least one field"));
        }
        let items = types
            .iter()
            .map(|ty| TupleDescItem {
                field_type: *ty,
                name: None,
            })
            .collect();
        Ok(Self { items })
    }

    /// Builds a schema from already-constructed items.
    pub fn from_items(items: Vec<TupleDescItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(TesseraError::Invalid("schema needs at least one field"));
        }
        Ok(Self { items })
    }

    /// Number of columns.
    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    /// Columns in order.
    pub fn items(&self) -> &[TupleDescItem] {
        &self.items
    }

    /// Type of column `idx`.
    pub fn field_type(&self, idx: usize) -> Option<FieldType> {
        self.items.get(idx).map(|item| item.field_type)
    }

    /// Name of column `idx`.
    pub fn field_name(&self, idx: usize) -> Option<&str> {
        self.items.get(idx).and_then(|item| item.name.as_deref())
    }

    /// Index of the first column called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// Width in bytes of one encoded tuple.
    pub fn byte_len(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_len()).sum()
    }

    /// Concatenates two schemas, `self` first.
    pub fn merge(&self, other: &TupleDesc) -> TupleDesc {
        let mut items = self.items.clone();
        items.extend(other.items.iter().cloned());
        TupleDesc { items }
    }

    /// Returns a copy whose column names are prefixed with `alias.`.
    pub fn with_alias(&self, alias: &str) -> TupleDesc {
        let items = self
            .items
            .iter()
            .map(|item| TupleDescItem {
                field_type: item.field_type,
                name: Some(format!(
                    "{alias}.{}",
                    item.name.as_deref().unwrap_or("null")
                )),
            })
            .collect();
        TupleDesc { items }
    }

    /// Checks that `fields` has this schema's arity, types and string widths.
    pub fn check(&self, fields: &[Field]) -> Result<()> {
        if fields.len() != self.items.len() {
            return Err(TesseraError::Invalid("tuple arity does not match schema"));
        }
        for (field, item) in fields.iter().zip(&self.items) {
            if field.field_type() != item.field_type {
                return Err(TesseraError::Invalid("tuple field type does not match schema"));
            }
            if let Field::Str(s) = field {
                if s.len() > STRING_LEN {
                    return Err(TesseraError::Invalid("string longer than field width"));
                }
            }
        }
        Ok(())
    }
}

/// A row: field values plus the slot it occupies once stored.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Tuple {
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Creates an unplaced tuple.
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    /// Field values in column order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at `idx`.
    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Replaces the field at `idx`.
    pub fn set_field(&mut self, idx: usize, value: Field) -> Result<()> {
        let slot = self
            .fields
            .get_mut(idx)
            .ok_or(TesseraError::Invalid("field index out of range"))?;
        *slot = value;
        Ok(())
    }

    /// Where the tuple is stored, if it has been placed on a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Records where the tuple is stored.
    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Encodes all fields back to back into `dst`.
    pub fn encode_into(&self, dst: &mut [u8]) -> Result<()> {
        let mut off = 0;
        for field in &self.fields {
            let width = field.field_type().byte_len();
            let end = off + width;
            if end > dst.len() {
                return Err(TesseraError::Invalid("tuple does not fit in slot"));
            }
            field.encode(&mut dst[off..end])?;
            off = end;
        }
        Ok(())
    }

    /// Decodes a tuple with schema `desc` from the front of `src`.
    pub fn decode(desc: &TupleDesc, src: &[u8]) -> Result<Self> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut off = 0;
        for item in desc.items() {
            let width = item.field_type.byte_len();
            if off + width > src.len() {
                return Err(TesseraError::Corruption("tuple truncated"));
            }
            fields.push(item.field_type.decode(&src[off..off + width])?);
            off += width;
        }
        Ok(Self::new(fields))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                f.write_str("\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}
