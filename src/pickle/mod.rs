//! A decoder for the Python pickle format.
//!
//! Only data is reconstructed: globals are recorded by name and `REDUCE`/`BUILD`
//! produce inert [`Value::Object`]s, nothing is ever called. This is enough to
//! read pickled dicts, lists and `numpy` arrays (see [`numpy`]).

pub mod numpy;
mod reader;

use std::{
    error::Error,
    fmt::{self, Display},
    sync::Arc,
};

pub use reader::Unpickler;

/// The result type of the pickle decoder.
pub type Result<T> = std::result::Result<T, PickleErr>;

/// Decodes a complete pickle held in memory.
///
/// # Arguments
/// * `buf` - The pickled bytes, starting at the first opcode.
///
/// # Returns
/// The top level value or the first decoding error.
pub fn from_slice(buf: &[u8]) -> Result<Value> {
    Unpickler::new(buf).load()
}

/// A decoded pickle value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Python 2 `str`, Python 3 `bytes` and `bytearray`.
    Bytes(Arc<Vec<u8>>),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Entries in insertion order.
    Dict(Vec<(Value, Value)>),
    Global {
        module: String,
        name: String,
    },
    /// The inert result of `REDUCE`, `NEWOBJ`, `INST` or `OBJ`, with the state
    /// attached by a following `BUILD`, if any.
    Object {
        class: Box<Value>,
        args: Box<Value>,
        state: Option<Box<Value>>,
    },
}

impl Value {
    pub(crate) fn bytes(bytes: Vec<u8>) -> Self {
        Value::Bytes(Arc::new(bytes))
    }

    /// Looks up `key` in a dict, matching both text and byte string keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let Value::Dict(entries) = self else {
            return None;
        };

        entries
            .iter()
            .find(|(k, _)| k.is_key(key))
            .map(|(_, v)| v)
    }

    /// Moves the entry for `key` out of a dict, leaving `Value::None` behind.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let Value::Dict(entries) = self else {
            return None;
        };

        entries
            .iter_mut()
            .find(|(k, _)| k.is_key(key))
            .map(|(_, v)| std::mem::replace(v, Value::None))
    }

    fn is_key(&self, key: &str) -> bool {
        match self {
            Value::Str(s) => s == key,
            Value::Bytes(b) => b.as_slice() == key.as_bytes(),
            Value::Object { .. } => self
                .encoded_text()
                .is_some_and(|text| text.chars().map(u32::from).eq(key.bytes().map(u32::from))),
            _ => false,
        }
    }

    /// Returns the text of a `_codecs.encode(text, "latin1")` object, the form
    /// Python 3 writes byte strings in below protocol 3.
    pub(crate) fn encoded_text(&self) -> Option<&str> {
        let Value::Object { class, args, .. } = self else {
            return None;
        };
        if !class.is_global("_codecs", "encode") {
            return None;
        }
        args.as_seq()?.first()?.as_str()
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            Value::Int(i) => Some(i != 0),
            _ => None,
        }
    }

    /// Returns the text of a `Str`, or of a `Bytes` holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the items of a tuple or a list.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Checks whether this is the global `module.name`.
    pub fn is_global(&self, module: &str, name: &str) -> bool {
        matches!(self, Value::Global { module: m, name: n } if m == module && n == name)
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Global { .. } => "global",
            Value::Object { .. } => "object",
        }
    }
}

/// Errors produced while decoding a pickle. Offsets point at the opcode byte.
#[derive(Debug)]
pub enum PickleErr {
    Eof {
        offset: usize,
    },
    UnknownOpcode {
        opcode: u8,
        offset: usize,
    },
    UnsupportedProtocol(u8),
    StackUnderflow {
        opcode: u8,
        offset: usize,
    },
    NoMark {
        opcode: u8,
        offset: usize,
    },
    MissingMemo {
        id: u32,
        offset: usize,
    },
    InvalidLiteral {
        opcode: u8,
        offset: usize,
        reason: String,
    },
    TypeMismatch {
        opcode: u8,
        offset: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// A well formed pickle whose content is not what the caller asked for.
    Unexpected(String),
}

impl Display for PickleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickleErr::Eof { offset } => write!(f, "unexpected end of data at byte {offset}"),
            PickleErr::UnknownOpcode { opcode, offset } => {
                write!(f, "unknown opcode {opcode:#04x} at byte {offset}")
            }
            PickleErr::UnsupportedProtocol(v) => write!(f, "unsupported pickle protocol {v}"),
            PickleErr::StackUnderflow { opcode, offset } => {
                write!(f, "stack underflow on opcode {opcode:#04x} at byte {offset}")
            }
            PickleErr::NoMark { opcode, offset } => {
                write!(f, "opcode {opcode:#04x} at byte {offset} expects a mark")
            }
            PickleErr::MissingMemo { id, offset } => {
                write!(f, "memo entry {id} requested at byte {offset} does not exist")
            }
            PickleErr::InvalidLiteral {
                opcode,
                offset,
                reason,
            } => write!(
                f,
                "invalid argument for opcode {opcode:#04x} at byte {offset}: {reason}"
            ),
            PickleErr::TypeMismatch {
                opcode,
                offset,
                expected,
                got,
            } => write!(
                f,
                "opcode {opcode:#04x} at byte {offset} expects a {expected}, got a {got}"
            ),
            PickleErr::Unexpected(msg) => f.write_str(msg),
        }
    }
}

impl Error for PickleErr {}
