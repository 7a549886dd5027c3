//! Typed values with SQL comparison semantics.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};
use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Text,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_DATE: u8 = 4;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True only for `Bool(true)`; NULL and non-booleans are not truthy.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(DataType::Int),
            Value::Text(_) => Some(DataType::Text),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Date(_) => Some(DataType::Date),
        }
    }

    /// SQL comparison: `None` when either side is NULL or the types do not
    /// line up.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL equality: NULL equals nothing, including NULL.
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order for sorting, with an explicit null placement. NULLs
    /// compare equal to each other.
    pub fn cmp_with_nulls(&self, other: &Value, nulls_first: bool) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Integer addition for aggregation. `None` on non-integer operands.
    pub fn add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(*b))),
            _ => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Int(_) => 8,
            Value::Text(s) => 4 + s.len(),
            Value::Bool(_) => 1,
            Value::Date(_) => 4,
        }
    }

    pub fn encode_into(&self, buf: &mut impl BufMut) {
        match self {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Int(v) => {
                buf.put_u8(TAG_INT);
                buf.put_i64_le(*v);
            }
            Value::Text(s) => {
                buf.put_u8(TAG_TEXT);
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Value::Bool(b) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(*b as u8);
            }
            Value::Date(d) => {
                buf.put_u8(TAG_DATE);
                buf.put_i32_le(date_to_days(*d));
            }
        }
    }

    pub fn decode_from(buf: &mut impl Buf) -> Value {
        match buf.get_u8() {
            TAG_INT => Value::Int(buf.get_i64_le()),
            TAG_TEXT => {
                let len = buf.get_u32_le() as usize;
                let mut bytes = vec![0u8; len];
                buf.copy_to_slice(&mut bytes);
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            TAG_BOOL => Value::Bool(buf.get_u8() != 0),
            TAG_DATE => Value::Date(days_to_date(buf.get_i32_le())),
            _ => Value::Null,
        }
    }
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce()
}

fn days_to_date(days: i32) -> NaiveDate {
    NaiveDate::from_num_days_from_ce_opt(days).unwrap_or_default()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_equals_nothing() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert!(!Value::Null.sql_eq(&Value::Int(1)));
        assert!(Value::Int(1).sql_eq(&Value::Int(1)));
        assert!(!Value::Int(1).sql_eq(&Value::Int(2)));
    }

    #[test]
    fn null_placement_in_sorts() {
        use Ordering::*;
        assert_eq!(Value::Null.cmp_with_nulls(&Value::Int(1), true), Less);
        assert_eq!(Value::Null.cmp_with_nulls(&Value::Int(1), false), Greater);
        assert_eq!(Value::Null.cmp_with_nulls(&Value::Null, true), Equal);
        assert_eq!(Value::Int(2).cmp_with_nulls(&Value::Int(1), true), Greater);
    }

    #[test]
    fn codec_round_trips_every_variant() {
        let values = vec![
            Value::Null,
            Value::Int(-42),
            Value::Text("hello".into()),
            Value::Bool(true),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        ];
        for value in values {
            let mut buf = Vec::new();
            value.encode_into(&mut buf);
            assert_eq!(buf.len(), value.encoded_len());
            let decoded = Value::decode_from(&mut buf.as_slice());
            assert_eq!(decoded, value);
        }
    }
}
