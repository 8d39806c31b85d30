use std::collections::HashMap;

use super::{PickleErr, Result, Value};

const HIGHEST_PROTOCOL: u8 = 5;

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const INST: u8 = b'i';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const OBJ: u8 = b'o';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    // protocol 2
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // protocol 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // protocol 5
    pub const BYTEARRAY8: u8 = 0x96;
}

/// A stack entry together with the memo ids that were assigned to it while it
/// sat on the stack.
struct Slot {
    value: Value,
    memo: Vec<u32>,
}

/// Containers are mutated in place while they are on the stack, so a memo entry
/// is only copied out once its value leaves the stack.
enum Memo {
    Ready(Value),
    Pending,
}

/// The pickle virtual machine.
pub struct Unpickler<'a> {
    buf: &'a [u8],
    pos: usize,
    opcode: u8,
    offset: usize,
    stack: Vec<Slot>,
    marks: Vec<usize>,
    memo: HashMap<u32, Memo>,
}

impl<'a> Unpickler<'a> {
    /// Creates a new `Unpickler` over an in-memory pickle.
    ///
    /// # Arguments
    /// * `buf` - The pickled bytes.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            opcode: 0,
            offset: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    /// Runs the machine until `STOP` and returns the top of the stack.
    ///
    /// The memo is dropped with the unpickler, so large byte strings are uniquely
    /// owned by the returned value.
    pub fn load(mut self) -> Result<Value> {
        loop {
            self.offset = self.pos;
            self.opcode = self.read_u8()?;

            match self.opcode {
                op::STOP => return self.pop(),
                op::PROTO => {
                    let version = self.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(PickleErr::UnsupportedProtocol(version));
                    }
                }
                op::FRAME => {
                    self.take(8)?;
                }
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => self.pop_discard()?,
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let value = self.top_mut()?.clone();
                    self.push(value);
                }

                op::NONE => self.push(Value::None),
                op::NEWTRUE => self.push(Value::Bool(true)),
                op::NEWFALSE => self.push(Value::Bool(false)),
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line {
                        b"00" => Value::Bool(false),
                        b"01" => Value::Bool(true),
                        _ => Value::Int(self.parse_int(line)?),
                    };
                    self.push(value);
                }
                op::BININT => {
                    let value = i32::from_le_bytes(self.array()?);
                    self.push(Value::Int(value as i64));
                }
                op::BININT1 => {
                    let value = self.read_u8()?;
                    self.push(Value::Int(value as i64));
                }
                op::BININT2 => {
                    let value = u16::from_le_bytes(self.array()?);
                    self.push(Value::Int(value as i64));
                }
                op::LONG => {
                    let line = self.read_line()?;
                    let digits = line.strip_suffix(b"L").unwrap_or(line);
                    let value = self.parse_int(digits)?;
                    self.push(Value::Int(value));
                }
                op::LONG1 => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?;
                    let value = self.decode_long(bytes)?;
                    self.push(Value::Int(value));
                }
                op::LONG4 => {
                    let len = self.read_len_i32()?;
                    let bytes = self.take(len)?;
                    let value = self.decode_long(bytes)?;
                    self.push(Value::Int(value));
                }
                op::FLOAT => {
                    let line = self.read_line()?;
                    let value = self.text(line)?.trim().parse::<f64>().map_err(|e| {
                        self.invalid(format!("bad float literal: {e}"))
                    })?;
                    self.push(Value::Float(value));
                }
                op::BINFLOAT => {
                    let value = f64::from_be_bytes(self.array()?);
                    self.push(Value::Float(value));
                }

                op::STRING => {
                    let line = self.read_line()?;
                    let bytes = self.unquote(line)?;
                    self.push(Value::bytes(bytes));
                }
                op::BINSTRING => {
                    let len = self.read_len_i32()?;
                    let bytes = self.take(len)?;
                    self.push(Value::bytes(bytes.to_vec()));
                }
                op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?;
                    self.push(Value::bytes(bytes.to_vec()));
                }
                op::BINBYTES => {
                    let len = u32::from_le_bytes(self.array()?) as usize;
                    let bytes = self.take(len)?;
                    self.push(Value::bytes(bytes.to_vec()));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.take(len)?;
                    self.push(Value::bytes(bytes.to_vec()));
                }
                op::UNICODE => {
                    let line = self.read_line()?;
                    let text = raw_unicode_escape(line).map_err(|reason| self.invalid(reason))?;
                    self.push(Value::Str(text));
                }
                op::BINUNICODE => {
                    let len = u32::from_le_bytes(self.array()?) as usize;
                    let bytes = self.take(len)?;
                    let text = self.text(bytes)?.to_string();
                    self.push(Value::Str(text));
                }
                op::SHORT_BINUNICODE => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?;
                    let text = self.text(bytes)?.to_string();
                    self.push(Value::Str(text));
                }
                op::BINUNICODE8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.take(len)?;
                    let text = self.text(bytes)?.to_string();
                    self.push(Value::Str(text));
                }

                op::EMPTY_LIST => self.push(Value::List(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.push(Value::List(items));
                }
                op::APPEND => {
                    let value = self.pop()?;
                    self.list_mut()?.push(value);
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.list_mut()?.extend(items);
                }

                op::EMPTY_TUPLE => self.push(Value::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let len = (self.opcode - op::TUPLE1 + 1) as usize;
                    let items = self.pop_n(len)?;
                    self.push(Value::Tuple(items));
                }

                op::EMPTY_DICT => self.push(Value::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let mut entries = Vec::new();
                    for (key, value) in self.pairs(items)? {
                        insert(&mut entries, key, value);
                    }
                    self.push(Value::Dict(entries));
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    insert(self.dict_mut()?, key, value);
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    let entries = self.dict_mut()?;
                    for (key, value) in pairs {
                        insert(entries, key, value);
                    }
                }

                op::GLOBAL => {
                    let module = self.read_line()?;
                    let module = self.text(module)?.to_string();
                    let name = self.read_line()?;
                    let name = self.text(name)?.to_string();
                    self.push(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Value::Str(module), Value::Str(name)) = (module, name) else {
                        return Err(self.invalid("STACK_GLOBAL expects two str operands"));
                    };
                    self.push(Value::Global { module, name });
                }
                op::REDUCE | op::NEWOBJ => {
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_object(class, args);
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_object(class, args);
                }
                op::INST => {
                    let module = self.read_line()?;
                    let module = self.text(module)?.to_string();
                    let name = self.read_line()?;
                    let name = self.text(name)?.to_string();
                    let args = self.pop_mark()?;
                    self.push_object(Value::Global { module, name }, Value::Tuple(args));
                }
                op::OBJ => {
                    let mut items = self.pop_mark()?.into_iter();
                    let Some(class) = items.next() else {
                        return Err(self.underflow());
                    };
                    self.push_object(class, Value::Tuple(items.collect()));
                }
                op::BUILD => {
                    let state = self.pop()?;
                    let (opcode, offset) = (self.opcode, self.offset);
                    match self.top_mut()? {
                        Value::Object { state: slot, .. } => *slot = Some(Box::new(state)),
                        other => {
                            return Err(PickleErr::TypeMismatch {
                                opcode,
                                offset,
                                expected: "object",
                                got: other.kind(),
                            });
                        }
                    }
                }

                op::PUT => {
                    let line = self.read_line()?;
                    let id = self.parse_id(line)?;
                    self.put(id)?;
                }
                op::BINPUT => {
                    let id = self.read_u8()? as u32;
                    self.put(id)?;
                }
                op::LONG_BINPUT => {
                    let id = u32::from_le_bytes(self.array()?);
                    self.put(id)?;
                }
                op::MEMOIZE => {
                    let id = self.memo.len() as u32;
                    self.put(id)?;
                }
                op::GET => {
                    let line = self.read_line()?;
                    let id = self.parse_id(line)?;
                    self.get(id)?;
                }
                op::BINGET => {
                    let id = self.read_u8()? as u32;
                    self.get(id)?;
                }
                op::LONG_BINGET => {
                    let id = u32::from_le_bytes(self.array()?);
                    self.get(id)?;
                }

                opcode => {
                    return Err(PickleErr::UnknownOpcode {
                        opcode,
                        offset: self.offset,
                    });
                }
            }
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or(PickleErr::Eof {
                offset: self.offset,
            })?;

        let bytes = &buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.array::<1>()?;
        Ok(byte)
    }

    fn read_len_i32(&mut self) -> Result<usize> {
        let len = i32::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| self.invalid(format!("negative length {len}")))
    }

    fn read_len_u64(&mut self) -> Result<usize> {
        let len = u64::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| self.invalid(format!("length {len} does not fit in memory")))
    }

    /// Reads up to the next newline, which is consumed but not returned.
    fn read_line(&mut self) -> Result<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let Some(len) = rest.iter().position(|&b| b == b'\n') else {
            return Err(PickleErr::Eof {
                offset: self.offset,
            });
        };

        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn text<'b>(&self, bytes: &'b [u8]) -> Result<&'b str> {
        std::str::from_utf8(bytes).map_err(|e| self.invalid(e.to_string()))
    }

    fn parse_int(&self, digits: &[u8]) -> Result<i64> {
        self.text(digits)?
            .trim()
            .parse()
            .map_err(|e| self.invalid(format!("bad integer literal: {e}")))
    }

    fn parse_id(&self, digits: &[u8]) -> Result<u32> {
        self.text(digits)?
            .trim()
            .parse()
            .map_err(|e| self.invalid(format!("bad memo id: {e}")))
    }

    /// Decodes a little endian two's complement integer of up to 8 bytes.
    fn decode_long(&self, bytes: &[u8]) -> Result<i64> {
        let Some(&last) = bytes.last() else {
            return Ok(0);
        };
        if bytes.len() > 8 {
            return Err(self.invalid("integer wider than 64 bits"));
        }

        let fill = if last & 0x80 != 0 { 0xff } else { 0 };
        let mut raw = [fill; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn unquote(&self, line: &[u8]) -> Result<Vec<u8>> {
        let inner = match line {
            [quote @ (b'\'' | b'"'), inner @ .., last] if last == quote => inner,
            _ => return Err(self.invalid("string literal is not quoted")),
        };

        unescape(inner).map_err(|reason| self.invalid(reason))
    }

    fn floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(Slot {
            value,
            memo: Vec::new(),
        });
    }

    fn push_object(&mut self, class: Value, args: Value) {
        self.push(Value::Object {
            class: Box::new(class),
            args: Box::new(args),
            state: None,
        });
    }

    fn settle(&mut self, slot: Slot) -> Value {
        for id in slot.memo {
            self.memo.insert(id, Memo::Ready(slot.value.clone()));
        }
        slot.value
    }

    fn pop(&mut self) -> Result<Value> {
        if self.stack.len() <= self.floor() {
            return Err(self.underflow());
        }
        let Some(slot) = self.stack.pop() else {
            return Err(self.underflow());
        };

        Ok(self.settle(slot))
    }

    fn pop_n(&mut self, len: usize) -> Result<Vec<Value>> {
        if self.stack.len() < self.floor() + len {
            return Err(self.underflow());
        }

        let slots = self.stack.split_off(self.stack.len() - len);
        Ok(slots.into_iter().map(|slot| self.settle(slot)).collect())
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let Some(mark) = self.marks.pop() else {
            return Err(PickleErr::NoMark {
                opcode: self.opcode,
                offset: self.offset,
            });
        };

        let slots = self.stack.split_off(mark);
        Ok(slots.into_iter().map(|slot| self.settle(slot)).collect())
    }

    fn pop_discard(&mut self) -> Result<()> {
        if self.stack.len() > self.floor() {
            self.pop()?;
        } else if self.marks.pop().is_none() {
            return Err(self.underflow());
        }
        Ok(())
    }

    fn top_mut(&mut self) -> Result<&mut Value> {
        if self.stack.len() <= self.floor() {
            return Err(self.underflow());
        }
        let err = self.underflow();
        self.stack.last_mut().map(|slot| &mut slot.value).ok_or(err)
    }

    fn list_mut(&mut self) -> Result<&mut Vec<Value>> {
        let (opcode, offset) = (self.opcode, self.offset);
        match self.top_mut()? {
            Value::List(items) => Ok(items),
            other => Err(PickleErr::TypeMismatch {
                opcode,
                offset,
                expected: "list",
                got: other.kind(),
            }),
        }
    }

    fn dict_mut(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        let (opcode, offset) = (self.opcode, self.offset);
        match self.top_mut()? {
            Value::Dict(entries) => Ok(entries),
            other => Err(PickleErr::TypeMismatch {
                opcode,
                offset,
                expected: "dict",
                got: other.kind(),
            }),
        }
    }

    fn pairs(&self, items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
        if items.len() % 2 != 0 {
            return Err(self.invalid("odd number of items for a dict"));
        }

        let mut items = items.into_iter();
        let mut pairs = Vec::new();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn put(&mut self, id: u32) -> Result<()> {
        if self.stack.len() <= self.floor() {
            return Err(self.underflow());
        }
        if let Some(slot) = self.stack.last_mut() {
            slot.memo.push(id);
        }
        self.memo.insert(id, Memo::Pending);
        Ok(())
    }

    fn get(&mut self, id: u32) -> Result<()> {
        let missing = PickleErr::MissingMemo {
            id,
            offset: self.offset,
        };

        let value = match self.memo.get(&id) {
            Some(Memo::Ready(value)) => value.clone(),
            Some(Memo::Pending) => self
                .stack
                .iter()
                .rev()
                .find(|slot| slot.memo.contains(&id))
                .map(|slot| slot.value.clone())
                .ok_or(missing)?,
            None => return Err(missing),
        };

        self.push(value);
        Ok(())
    }

    fn underflow(&self) -> PickleErr {
        PickleErr::StackUnderflow {
            opcode: self.opcode,
            offset: self.offset,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> PickleErr {
        PickleErr::InvalidLiteral {
            opcode: self.opcode,
            offset: self.offset,
            reason: reason.into(),
        }
    }
}

/// Inserts with Python dict semantics, a repeated key overwrites the old value.
fn insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Undoes the escaping of a Python 2 `repr` of a byte string.
fn unescape(raw: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];
        i += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }

        let Some(&esc) = raw.get(i) else {
            return Err("trailing backslash in string literal".to_string());
        };
        i += 1;

        match esc {
            b'\n' => {}
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let digits = raw.get(i..i + 2).ok_or("truncated \\x escape")?;
                out.push(hex_value(digits)? as u8);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = (esc - b'0') as u32;
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + (digit - b'0') as u32;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }

    Ok(out)
}

/// Decodes Python's `raw-unicode-escape`: latin-1 plus `\uXXXX` and `\UXXXXXXXX`.
fn raw_unicode_escape(raw: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];
        if byte == b'\\' {
            let width = match raw.get(i + 1) {
                Some(b'u') => 4,
                Some(b'U') => 8,
                _ => 0,
            };

            if width > 0 {
                let digits = raw
                    .get(i + 2..i + 2 + width)
                    .ok_or("truncated unicode escape")?;
                let code = hex_value(digits)?;
                let c = char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))?;
                out.push(c);
                i += 2 + width;
                continue;
            }
        }

        out.push(byte as char);
        i += 1;
    }

    Ok(out)
}

fn hex_value(digits: &[u8]) -> std::result::Result<u32, String> {
    let text = std::str::from_utf8(digits).map_err(|e| e.to_string())?;
    u32::from_str_radix(text, 16).map_err(|e| format!("bad hex escape `{text}`: {e}"))
}
