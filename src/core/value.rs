//! Layer 2: Polymorphic attribute values
//!
//! Values of unrelated shapes are (de)serialized uniformly through the
//! prototype capability interface; the registry dispatches by spec identity,
//! never by inheritance.

use std::any::Any;
use std::fmt;

use minicbor::{Decoder, Encoder};

use super::error::ValueError;
use super::tag::TagId;

/// Capability interface for a typed attribute payload.
///
/// A registered prototype is a zero-valued template; `new_instance` is the
/// factory the registry uses to produce fresh values for decode.
pub trait AttrValue: fmt::Debug + Send + Sync {
    /// Fresh zero-valued instance of the same concrete type.
    fn new_instance(&self) -> Box<dyn AttrValue>;

    /// Append this value's serialized form to a Tx data store.
    fn marshal_to_store(&self, store: &mut Vec<u8>) -> Result<(), ValueError>;

    /// Replace this value's contents from serialized bytes.
    fn unmarshal(&mut self, src: &[u8]) -> Result<(), ValueError>;

    /// Leaf name used when the prototype is registered without an explicit
    /// name.
    fn spec_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

fn check_consumed(dec: &Decoder<'_>, src: &[u8]) -> Result<(), ValueError> {
    let rest = src.len().saturating_sub(dec.position());
    if rest > 0 {
        return Err(ValueError::TrailingBytes { got: rest });
    }
    Ok(())
}

/// A bare tag reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagValue(pub TagId);

impl AttrValue for TagValue {
    fn new_instance(&self) -> Box<dyn AttrValue> {
        Box::new(TagValue::default())
    }

    fn marshal_to_store(&self, store: &mut Vec<u8>) -> Result<(), ValueError> {
        let mut enc = Encoder::new(store);
        enc.bytes(&self.0.to_bytes())?;
        Ok(())
    }

    fn unmarshal(&mut self, src: &[u8]) -> Result<(), ValueError> {
        let mut dec = Decoder::new(src);
        let raw = dec.bytes()?;
        if raw.len() != 24 {
            return Err(minicbor::decode::Error::message("tag value must be 24 bytes").into());
        }
        let mut words = [0u64; 3];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&raw[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        self.0 = TagId::from_words(words);
        check_consumed(&dec, src)
    }

    fn spec_name(&self) -> &'static str {
        "Tag"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// UTF-8 text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextValue(pub String);

impl AttrValue for TextValue {
    fn new_instance(&self) -> Box<dyn AttrValue> {
        Box::new(TextValue::default())
    }

    fn marshal_to_store(&self, store: &mut Vec<u8>) -> Result<(), ValueError> {
        let mut enc = Encoder::new(store);
        enc.str(&self.0)?;
        Ok(())
    }

    fn unmarshal(&mut self, src: &[u8]) -> Result<(), ValueError> {
        let mut dec = Decoder::new(src);
        self.0 = dec.str()?.to_string();
        check_consumed(&dec, src)
    }

    fn spec_name(&self) -> &'static str {
        "Text"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An error surfaced as cell state (e.g. a rejected child pin).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrValue {
    pub code: String,
    pub msg: String,
}

impl AttrValue for ErrValue {
    fn new_instance(&self) -> Box<dyn AttrValue> {
        Box::new(ErrValue::default())
    }

    fn marshal_to_store(&self, store: &mut Vec<u8>) -> Result<(), ValueError> {
        let mut enc = Encoder::new(store);
        enc.map(2)?;
        enc.str("code")?;
        enc.str(&self.code)?;
        enc.str("msg")?;
        enc.str(&self.msg)?;
        Ok(())
    }

    fn unmarshal(&mut self, src: &[u8]) -> Result<(), ValueError> {
        let mut dec = Decoder::new(src);
        let len = dec
            .map()?
            .ok_or_else(|| minicbor::decode::Error::message("indefinite map"))?;
        let mut code = None;
        let mut msg = None;
        for _ in 0..len {
            match dec.str()? {
                "code" => code = Some(dec.str()?.to_string()),
                "msg" => msg = Some(dec.str()?.to_string()),
                _ => dec.skip()?,
            }
        }
        self.code = code.ok_or_else(|| minicbor::decode::Error::message("missing code"))?;
        self.msg = msg.ok_or_else(|| minicbor::decode::Error::message("missing msg"))?;
        check_consumed(&dec, src)
    }

    fn spec_name(&self) -> &'static str {
        "Err"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A spatial position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PosValue {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AttrValue for PosValue {
    fn new_instance(&self) -> Box<dyn AttrValue> {
        Box::new(PosValue::default())
    }

    fn marshal_to_store(&self, store: &mut Vec<u8>) -> Result<(), ValueError> {
        let mut enc = Encoder::new(store);
        enc.array(3)?;
        enc.f64(self.x)?;
        enc.f64(self.y)?;
        enc.f64(self.z)?;
        Ok(())
    }

    fn unmarshal(&mut self, src: &[u8]) -> Result<(), ValueError> {
        let mut dec = Decoder::new(src);
        let len = dec
            .array()?
            .ok_or_else(|| minicbor::decode::Error::message("indefinite array"))?;
        if len != 3 {
            return Err(minicbor::decode::Error::message("position must have 3 axes").into());
        }
        self.x = dec.f64()?;
        self.y = dec.f64()?;
        self.z = dec.f64()?;
        check_consumed(&dec, src)
    }

    fn spec_name(&self) -> &'static str {
        "Pos"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarshal_replaces_prior_contents() {
        let original = TextValue("directory/listing".into());
        let mut store = Vec::new();
        original.marshal_to_store(&mut store).unwrap();

        let mut target = TextValue("stale".into());
        target.unmarshal(&store).unwrap();
        assert_eq!(target, original);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut store = Vec::new();
        TagValue(TagId::from_literal("x"))
            .marshal_to_store(&mut store)
            .unwrap();
        store.push(0x00);

        let mut out = TagValue::default();
        let err = out.unmarshal(&store).unwrap_err();
        assert!(matches!(err, ValueError::TrailingBytes { got: 1 }));
    }

    #[test]
    fn err_value_requires_both_fields() {
        let mut store = Vec::new();
        {
            let mut enc = Encoder::new(&mut store);
            enc.map(1).unwrap();
            enc.str("code").unwrap();
            enc.str("cell_not_found").unwrap();
        }
        let mut out = ErrValue::default();
        assert!(out.unmarshal(&store).is_err());
    }

    #[test]
    fn prototype_spawns_zero_valued_instances() {
        let proto: Box<dyn AttrValue> = Box::new(PosValue {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        let fresh = proto.new_instance();
        let pos = fresh.as_any().downcast_ref::<PosValue>().unwrap();
        assert_eq!(*pos, PosValue::default());
    }
}
