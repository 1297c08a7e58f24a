use bytes::Bytes;

/// A single column value.
///
/// Exactly one variant is inhabited. `Timestamp` carries non-leap
/// milliseconds since the UNIX epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Timestamp(i64),
    Varbinary(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an `i64`, when the variant is a signed integer or a
    /// timestamp.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(v) => Some(*v as i64),
            Self::Int16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt8(v) => Some(*v as u64),
            Self::UInt16(v) => Some(*v as u64),
            Self::UInt32(v) => Some(*v as u64),
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Varbinary(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Varbinary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variant() {
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert_eq!(Value::Int16(-3).as_i64(), Some(-3));
        assert_eq!(Value::Timestamp(i64::MAX).as_i64(), Some(i64::MAX));
        assert_eq!(Value::UInt32(7).as_u64(), Some(7));
        assert_eq!(Value::Float32(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::String("x".into()).as_str(), Some("x"));
        assert_eq!(
            Value::Varbinary(Bytes::from_static(b"\x00\x01")).as_bytes(),
            Some(&b"\x00\x01"[..])
        );

        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.as_bool(), None);
        assert_eq!(Value::String("1".into()).as_i64(), None);
    }

    #[test]
    fn from_impls_pick_the_widest_variant() {
        assert_eq!(Value::from(1_i64), Value::Int64(1));
        assert_eq!(Value::from(1_u64), Value::UInt64(1));
        assert_eq!(Value::from(0.25_f64), Value::Float64(0.25));
        assert_eq!(Value::from("tessera"), Value::String("tessera".into()));
    }
}
