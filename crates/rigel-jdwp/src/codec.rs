//! Big-endian JDWP packet codec.
//!
//! Readers are bounds-checked; a short buffer is a protocol error, never a
//! panic. Id fields are variable width per the negotiated
//! [`JdwpIdSizes`](crate::JdwpIdSizes).

use crate::types::{
    tag, JdwpError, JdwpIdSizes, JdwpValue, Location, ObjectId, ReferenceTypeId, Result,
};

pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";
pub const HEADER_LEN: usize = 11;
pub const FLAG_REPLY: u8 = 0x80;

/// First byte of a JDWP type signature, which doubles as the value tag for
/// values of that type (`I`, `J`, `Ljava/lang/String;` → `L`, `[I` → `[`).
pub fn signature_to_tag(signature: &str) -> u8 {
    signature.as_bytes().first().copied().unwrap_or(tag::VOID)
}

/// Convert a Java binary class name (`java.lang.String`) into a JDWP
/// reference type signature (`Ljava/lang/String;`). Signatures pass through
/// unchanged, as do primitive and array signatures.
pub fn class_name_to_signature(class: &str) -> String {
    if class.starts_with('[') || (class.starts_with('L') && class.ends_with(';')) {
        return class.to_string();
    }
    match class {
        "boolean" => return "Z".to_string(),
        "byte" => return "B".to_string(),
        "char" => return "C".to_string(),
        "short" => return "S".to_string(),
        "int" => return "I".to_string(),
        "long" => return "J".to_string(),
        "float" => return "F".to_string(),
        "double" => return "D".to_string(),
        "void" => return "V".to_string(),
        _ => {}
    }
    let internal = class.replace('.', "/");
    format!("L{internal};")
}

#[derive(Default)]
pub struct JdwpWriter {
    buf: Vec<u8>,
}

impl JdwpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// JDWP strings are a u32 byte count followed by UTF-8 bytes.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_id(&mut self, id: u64, size: usize) {
        let be = id.to_be_bytes();
        self.buf.extend_from_slice(&be[8 - size..]);
    }

    pub fn write_object_id(&mut self, id: ObjectId, sizes: &JdwpIdSizes) {
        self.write_id(id, sizes.object_id);
    }

    pub fn write_tagged_object_id(&mut self, tag: u8, id: ObjectId, sizes: &JdwpIdSizes) {
        self.write_u8(tag);
        self.write_object_id(id, sizes);
    }

    pub fn write_reference_type_id(&mut self, id: ReferenceTypeId, sizes: &JdwpIdSizes) {
        self.write_id(id, sizes.reference_type_id);
    }

    pub fn write_frame_id(&mut self, id: u64, sizes: &JdwpIdSizes) {
        self.write_id(id, sizes.frame_id);
    }

    pub fn write_location(&mut self, loc: &Location, sizes: &JdwpIdSizes) {
        self.write_u8(loc.type_tag);
        self.write_reference_type_id(loc.class_id, sizes);
        self.write_id(loc.method_id, sizes.method_id);
        self.write_u64(loc.index);
    }

    /// Untagged value encoding, used where the receiver already knows the
    /// type (e.g. `SetValues` against a known field signature).
    pub fn write_value(&mut self, v: &JdwpValue, sizes: &JdwpIdSizes) {
        match *v {
            JdwpValue::Void => {}
            JdwpValue::Null => self.write_object_id(0, sizes),
            JdwpValue::Boolean(v) => self.write_bool(v),
            JdwpValue::Byte(v) => self.write_u8(v as u8),
            JdwpValue::Char(v) => self.write_u16(v),
            JdwpValue::Short(v) => self.write_u16(v as u16),
            JdwpValue::Int(v) => self.write_i32(v),
            JdwpValue::Long(v) => self.write_i64(v),
            JdwpValue::Float(v) => self.write_f32(v),
            JdwpValue::Double(v) => self.write_f64(v),
            JdwpValue::Object { id, .. } => self.write_object_id(id, sizes),
        }
    }

    pub fn write_tagged_value(&mut self, v: &JdwpValue, sizes: &JdwpIdSizes) {
        self.write_u8(v.tag());
        self.write_value(v, sizes);
    }
}

pub struct JdwpReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> JdwpReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let chunk = self.slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    fn slice(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(JdwpError::Protocol(format!(
                "buffer underflow: need {n} bytes at {}, have {}",
                self.pos,
                self.buf.len()
            )));
        };
        let chunk = &self.buf[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.slice(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| JdwpError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.slice(len)
    }

    pub fn read_id(&mut self, size: usize) -> Result<u64> {
        if size == 0 || size > 8 {
            return Err(JdwpError::Protocol(format!("invalid id size: {size}")));
        }
        let chunk = self.slice(size)?;
        let mut be = [0u8; 8];
        be[8 - size..].copy_from_slice(chunk);
        Ok(u64::from_be_bytes(be))
    }

    pub fn read_object_id(&mut self, sizes: &JdwpIdSizes) -> Result<ObjectId> {
        self.read_id(sizes.object_id)
    }

    pub fn read_tagged_object_id(&mut self, sizes: &JdwpIdSizes) -> Result<(u8, ObjectId)> {
        let tag = self.read_u8()?;
        let id = self.read_object_id(sizes)?;
        Ok((tag, id))
    }

    pub fn read_reference_type_id(&mut self, sizes: &JdwpIdSizes) -> Result<ReferenceTypeId> {
        self.read_id(sizes.reference_type_id)
    }

    pub fn read_frame_id(&mut self, sizes: &JdwpIdSizes) -> Result<u64> {
        self.read_id(sizes.frame_id)
    }

    pub fn read_location(&mut self, sizes: &JdwpIdSizes) -> Result<Location> {
        Ok(Location {
            type_tag: self.read_u8()?,
            class_id: self.read_reference_type_id(sizes)?,
            method_id: self.read_id(sizes.method_id)?,
            index: self.read_u64()?,
        })
    }

    /// Untagged value with a caller-supplied tag. Object-like tags with id 0
    /// decode as [`JdwpValue::Null`].
    pub fn read_value(&mut self, tag_byte: u8, sizes: &JdwpIdSizes) -> Result<JdwpValue> {
        let v = match tag_byte {
            tag::BOOLEAN => JdwpValue::Boolean(self.read_bool()?),
            tag::BYTE => JdwpValue::Byte(self.read_u8()? as i8),
            tag::CHAR => JdwpValue::Char(self.read_u16()?),
            tag::SHORT => JdwpValue::Short(self.read_u16()? as i16),
            tag::INT => JdwpValue::Int(self.read_i32()?),
            tag::LONG => JdwpValue::Long(self.read_i64()?),
            tag::FLOAT => JdwpValue::Float(self.read_f32()?),
            tag::DOUBLE => JdwpValue::Double(self.read_f64()?),
            tag::VOID => JdwpValue::Void,
            _ => match self.read_object_id(sizes)? {
                0 => JdwpValue::Null,
                id => JdwpValue::Object { tag: tag_byte, id },
            },
        };
        Ok(v)
    }

    pub fn read_tagged_value(&mut self, sizes: &JdwpIdSizes) -> Result<JdwpValue> {
        let tag_byte = self.read_u8()?;
        self.read_value(tag_byte, sizes)
    }
}

pub fn encode_command(id: u32, command_set: u8, command: u8, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(0); // flags
    out.push(command_set);
    out.push(command);
    out.extend_from_slice(payload);
    out
}

pub fn encode_reply(id: u32, error_code: u16, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(FLAG_REPLY);
    out.extend_from_slice(&error_code.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> JdwpIdSizes {
        JdwpIdSizes::default()
    }

    #[test]
    fn class_name_to_signature_converts_names_and_primitives() {
        assert_eq!(class_name_to_signature("java.lang.String"), "Ljava/lang/String;");
        assert_eq!(class_name_to_signature("Main"), "LMain;");
        assert_eq!(class_name_to_signature("int"), "I");
        assert_eq!(class_name_to_signature("[I"), "[I");
        assert_eq!(class_name_to_signature("Ljava/util/List;"), "Ljava/util/List;");
    }

    #[test]
    fn ids_honour_negotiated_width() {
        let mut w = JdwpWriter::new();
        w.write_id(0xAABBCCDD, 4);
        let buf = w.into_vec();
        assert_eq!(buf, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        let mut r = JdwpReader::new(&buf);
        assert_eq!(r.read_id(4).unwrap(), 0xAABBCCDD);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn tagged_values_round_trip() {
        let values = [
            JdwpValue::Boolean(true),
            JdwpValue::Byte(-4),
            JdwpValue::Char(0x2603),
            JdwpValue::Short(-300),
            JdwpValue::Int(123_456),
            JdwpValue::Long(-9_000_000_000),
            JdwpValue::Float(1.5),
            JdwpValue::Double(-0.125),
            JdwpValue::Null,
            JdwpValue::Object { tag: tag::STRING, id: 0x42 },
        ];
        let mut w = JdwpWriter::new();
        for v in &values {
            w.write_tagged_value(v, &sizes());
        }
        let buf = w.into_vec();
        let mut r = JdwpReader::new(&buf);
        for v in &values {
            assert_eq!(r.read_tagged_value(&sizes()).unwrap(), *v);
        }
    }

    #[test]
    fn null_decodes_from_zero_object_id() {
        let mut w = JdwpWriter::new();
        w.write_tagged_object_id(tag::OBJECT, 0, &sizes());
        let buf = w.into_vec();
        let mut r = JdwpReader::new(&buf);
        assert_eq!(r.read_tagged_value(&sizes()).unwrap(), JdwpValue::Null);
    }

    #[test]
    fn short_buffer_is_a_protocol_error() {
        let mut r = JdwpReader::new(&[0x01, 0x02]);
        assert!(matches!(r.read_u32(), Err(JdwpError::Protocol(_))));
    }

    #[test]
    fn reply_header_layout() {
        let reply = encode_reply(7, 0, &[0xAB]);
        assert_eq!(reply.len(), HEADER_LEN + 1);
        assert_eq!(&reply[0..4], &12u32.to_be_bytes());
        assert_eq!(&reply[4..8], &7u32.to_be_bytes());
        assert_eq!(reply[8], FLAG_REPLY);
        assert_eq!(&reply[9..11], &0u16.to_be_bytes());
        assert_eq!(reply[11], 0xAB);
    }
}
