//! Tuples and schemas. The byte form is self-describing so spilled tuples
//! round-trip through intermediate result pages without a schema in hand.

use bytes::{Buf, BufMut};

use crate::value::{DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

pub type Schema = Vec<Column>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.values.iter().map(Value::encoded_len).sum::<usize>()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u16_le(self.values.len() as u16);
        for value in &self.values {
            value.encode_into(&mut buf);
        }
        buf
    }

    pub fn deserialize(mut bytes: &[u8]) -> Tuple {
        let count = bytes.get_u16_le() as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(Value::decode_from(&mut bytes));
        }
        Tuple { values }
    }
}
