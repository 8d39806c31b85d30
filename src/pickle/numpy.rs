//! Pickled `numpy.ndarray`s.
//!
//! numpy pickles an array either as `_reconstruct(ndarray, (0,), b'b')` followed
//! by a `BUILD` with `(version, shape, dtype, is_fortran, raw)`, or, from protocol
//! 5 on, as `_frombuffer(raw, dtype, shape, order)`.

use std::sync::Arc;

use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use super::{PickleErr, Result, Value};

const MULTIARRAY: [&str; 2] = ["numpy.core.multiarray", "numpy._core.multiarray"];
const NUMERIC: [&str; 2] = ["numpy.core.numeric", "numpy._core.numeric"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// The subset of a numpy dtype needed to read plain numeric buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    /// numpy's kind character: `u`, `i`, `f`, `b`...
    pub kind: char,
    /// Item size in bytes.
    pub size: usize,
    pub order: ByteOrder,
}

/// A numpy array lifted out of a pickle, still holding its raw buffer.
#[derive(Debug)]
pub struct NdArray {
    shape: Vec<usize>,
    dtype: Dtype,
    fortran_order: bool,
    data: Vec<u8>,
}

impl NdArray {
    /// Interprets a decoded pickle value as a numpy array.
    ///
    /// # Arguments
    /// * `value` - The value produced by unpickling an array.
    ///
    /// # Returns
    /// The array, or an error if `value` isn't a numpy array or its buffer doesn't
    /// match its shape and dtype.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value.kind();
        let Value::Object { class, args, state } = value else {
            return Err(unexpected(format!("expected a numpy array, got a {kind}")));
        };

        let is = |module: &[&str], name| module.iter().any(|m| class.is_global(m, name));
        let array = if is(&MULTIARRAY, "_reconstruct") {
            let state = state.ok_or_else(|| unexpected("numpy array has no state"))?;
            Self::from_state(*state)?
        } else if is(&NUMERIC, "_frombuffer") {
            Self::from_buffer_args(*args)?
        } else {
            return Err(unexpected(format!("expected a numpy array, got {class:?}")));
        };

        let expected = array
            .shape
            .iter()
            .try_fold(array.dtype.size, |bytes, &dim| bytes.checked_mul(dim))
            .ok_or_else(|| unexpected(format!("numpy shape {:?} is too large", array.shape)))?;
        if array.data.len() != expected {
            return Err(unexpected(format!(
                "numpy buffer holds {} bytes, shape {:?} of {}-byte items needs {expected}",
                array.data.len(),
                array.shape,
                array.dtype.size
            )));
        }

        Ok(array)
    }

    fn from_state(state: Value) -> Result<Self> {
        let Value::Tuple(mut items) = state else {
            return Err(unexpected("numpy array state is not a tuple"));
        };
        if items.len() == 5 {
            items.remove(0);
        }

        let [shape, dtype, fortran, data]: [Value; 4] = items
            .try_into()
            .map_err(|items: Vec<Value>| {
                unexpected(format!("numpy array state has {} items", items.len()))
            })?;

        let fortran_order = fortran
            .as_bool()
            .ok_or_else(|| unexpected("numpy fortran flag is not a bool"))?;

        Ok(Self {
            shape: parse_shape(&shape)?,
            dtype: parse_dtype(&dtype)?,
            fortran_order,
            data: raw_bytes(data)?,
        })
    }

    fn from_buffer_args(args: Value) -> Result<Self> {
        let Value::Tuple(items) = args else {
            return Err(unexpected("_frombuffer arguments are not a tuple"));
        };

        let [data, dtype, shape, order]: [Value; 4] = items
            .try_into()
            .map_err(|_| unexpected("_frombuffer expects 4 arguments"))?;

        let fortran_order = match order.as_str() {
            Some("C") => false,
            Some("F") => true,
            _ => return Err(unexpected(format!("unknown array order {order:?}"))),
        };

        Ok(Self {
            shape: parse_shape(&shape)?,
            dtype: parse_dtype(&dtype)?,
            fortran_order,
            data: raw_bytes(data)?,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Converts a `uint8` array into a standard layout ndarray.
    pub fn into_u8(self) -> Result<ArrayD<u8>> {
        if self.dtype.kind != 'u' || self.dtype.size != 1 {
            return Err(unexpected(format!(
                "expected a uint8 array, got {:?}",
                self.dtype
            )));
        }

        let shape = IxDyn(&self.shape).set_f(self.fortran_order);
        let array = ArrayD::from_shape_vec(shape, self.data)
            .map_err(|e| unexpected(e.to_string()))?;
        Ok(standard(array))
    }

    /// Converts an integer array of any width and byte order into `i64`s.
    pub fn into_i64(self) -> Result<ArrayD<i64>> {
        let Dtype { kind, size, order } = self.dtype;
        let signed = match kind {
            'i' => true,
            'u' => false,
            _ => return Err(unexpected(format!("expected an integer array, got {:?}", self.dtype))),
        };
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(unexpected(format!("unsupported integer width {size}")));
        }

        let values = self
            .data
            .chunks_exact(size)
            .map(|chunk| {
                decode_int(chunk, signed, order)
                    .ok_or_else(|| unexpected("unsigned value does not fit in an i64"))
            })
            .collect::<Result<Vec<_>>>()?;

        let shape = IxDyn(&self.shape).set_f(self.fortran_order);
        let array = ArrayD::from_shape_vec(shape, values).map_err(|e| unexpected(e.to_string()))?;
        Ok(standard(array))
    }
}

fn standard<T: Clone>(array: ArrayD<T>) -> ArrayD<T> {
    if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    }
}

fn unexpected(msg: impl Into<String>) -> PickleErr {
    PickleErr::Unexpected(msg.into())
}

fn parse_shape(value: &Value) -> Result<Vec<usize>> {
    let dims = value
        .as_seq()
        .ok_or_else(|| unexpected(format!("numpy shape is a {}", value.kind())))?;

    dims.iter()
        .map(|dim| {
            dim.as_int()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| unexpected(format!("invalid numpy dimension {dim:?}")))
        })
        .collect()
}

/// Reads a pickled `numpy.dtype(descr, align, copy)` with its `BUILD` state.
fn parse_dtype(value: &Value) -> Result<Dtype> {
    let Value::Object { class, args, state } = value else {
        return Err(unexpected(format!("numpy dtype is a {}", value.kind())));
    };
    if !class.is_global("numpy", "dtype") {
        return Err(unexpected(format!("expected numpy.dtype, got {class:?}")));
    }

    let descr = args
        .as_seq()
        .and_then(|args| args.first())
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected("numpy dtype has no descriptor"))?;

    let (prefix, rest) = match descr.chars().next() {
        Some(c @ ('<' | '>' | '|' | '=')) => (Some(c), &descr[1..]),
        _ => (None, descr),
    };

    let mut chars = rest.chars();
    let kind = chars
        .next()
        .ok_or_else(|| unexpected("empty numpy dtype descriptor"))?;
    let size = chars
        .as_str()
        .parse()
        .map_err(|_| unexpected(format!("unsupported numpy dtype `{descr}`")))?;

    // The byte order lives in the state: (version, order, ...).
    let order_char = state
        .as_deref()
        .and_then(Value::as_seq)
        .and_then(|state| state.get(1))
        .and_then(Value::as_str)
        .and_then(|s| s.chars().next())
        .or(prefix);

    let order = match order_char {
        Some('>') => ByteOrder::Big,
        Some('<') | Some('|') => ByteOrder::Little,
        _ if cfg!(target_endian = "big") => ByteOrder::Big,
        _ => ByteOrder::Little,
    };

    Ok(Dtype { kind, size, order })
}

/// Extracts an array buffer: raw bytes, a latin-1 `str`, or
/// `_codecs.encode(text, "latin1")` as written by Python 3 for Python 2 strings.
fn raw_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(Arc::try_unwrap(bytes).unwrap_or_else(|b| b.as_ref().clone())),
        Value::Str(text) => latin1(&text),
        other => match other.encoded_text() {
            Some(text) => latin1(text),
            None => Err(unexpected(format!("numpy buffer is a {}", other.kind()))),
        },
    }
}

fn latin1(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(c).map_err(|_| unexpected(format!("{c:?} is not latin-1"))))
        .collect()
}

fn decode_int(bytes: &[u8], signed: bool, order: ByteOrder) -> Option<i64> {
    let fold = |acc: u64, &b: &u8| (acc << 8) | b as u64;
    let value = match order {
        ByteOrder::Little => bytes.iter().rev().fold(0, fold),
        ByteOrder::Big => bytes.iter().fold(0, fold),
    };

    if signed {
        let shift = 64 - bytes.len() * 8;
        Some(((value << shift) as i64) >> shift)
    } else {
        i64::try_from(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn global(module: &str, name: &str) -> Value {
        Value::Global {
            module: module.to_string(),
            name: name.to_string(),
        }
    }

    fn object(class: Value, args: Value, state: Option<Value>) -> Value {
        Value::Object {
            class: Box::new(class),
            args: Box::new(args),
            state: state.map(Box::new),
        }
    }

    fn dtype(descr: &str, order: &str) -> Value {
        object(
            global("numpy", "dtype"),
            Value::Tuple(vec![
                Value::bytes(descr.as_bytes().to_vec()),
                Value::Bool(false),
                Value::Bool(true),
            ]),
            Some(Value::Tuple(vec![
                Value::Int(3),
                Value::bytes(order.as_bytes().to_vec()),
                Value::None,
            ])),
        )
    }

    fn reconstruct(shape: &[i64], dtype: Value, fortran: bool, data: Value) -> Value {
        object(
            global("numpy.core.multiarray", "_reconstruct"),
            Value::Tuple(vec![
                global("numpy", "ndarray"),
                Value::Tuple(vec![Value::Int(0)]),
                Value::bytes(b"b".to_vec()),
            ]),
            Some(Value::Tuple(vec![
                Value::Int(1),
                Value::Tuple(shape.iter().copied().map(Value::Int).collect()),
                dtype,
                Value::Bool(fortran),
                data,
            ])),
        )
    }

    #[test]
    fn c_ordered_u8() {
        let value = reconstruct(
            &[2, 3],
            dtype("u1", "|"),
            false,
            Value::bytes(vec![1, 2, 3, 4, 5, 6]),
        );
        let array = NdArray::from_value(value).unwrap();
        assert_eq!(array.shape(), &[2, 3]);

        let array = array.into_u8().unwrap();
        assert_eq!(array, array![[1u8, 2, 3], [4, 5, 6]].into_dyn());
    }

    #[test]
    fn fortran_ordered_u8() {
        let value = reconstruct(
            &[2, 3],
            dtype("u1", "|"),
            true,
            Value::bytes(vec![1, 2, 3, 4, 5, 6]),
        );
        let array = NdArray::from_value(value).unwrap().into_u8().unwrap();

        assert!(array.is_standard_layout());
        assert_eq!(array, array![[1u8, 3, 5], [2, 4, 6]].into_dyn());
    }

    #[test]
    fn little_endian_i64() {
        let mut data = (-1i64).to_le_bytes().to_vec();
        data.extend_from_slice(&5i64.to_le_bytes());
        let value = reconstruct(&[2], dtype("i8", "<"), false, Value::bytes(data));

        let array = NdArray::from_value(value).unwrap().into_i64().unwrap();
        assert_eq!(array, array![-1i64, 5].into_dyn());
    }

    #[test]
    fn big_endian_i16() {
        let value = reconstruct(&[2], dtype("i2", ">"), false, Value::bytes(vec![1, 2, 0xff, 0xfe]));

        let array = NdArray::from_value(value).unwrap();
        assert_eq!(
            array.dtype(),
            Dtype {
                kind: 'i',
                size: 2,
                order: ByteOrder::Big
            }
        );

        let array = array.into_i64().unwrap();
        assert_eq!(array, array![258i64, -2].into_dyn());
    }

    #[test]
    fn latin1_encoded_buffer() {
        let data = object(
            global("_codecs", "encode"),
            Value::Tuple(vec![
                Value::Str("\u{0}\u{ff}".to_string()),
                Value::Str("latin1".to_string()),
            ]),
            None,
        );
        let value = reconstruct(&[2], dtype("u1", "|"), false, data);

        let array = NdArray::from_value(value).unwrap().into_u8().unwrap();
        assert_eq!(array, array![0u8, 255].into_dyn());
    }

    #[test]
    fn frombuffer_form() {
        let value = object(
            global("numpy._core.numeric", "_frombuffer"),
            Value::Tuple(vec![
                Value::bytes(vec![9, 8, 7, 6]),
                dtype("u1", "|"),
                Value::Tuple(vec![Value::Int(2), Value::Int(2)]),
                Value::Str("C".to_string()),
            ]),
            None,
        );

        let array = NdArray::from_value(value).unwrap().into_u8().unwrap();
        assert_eq!(array, array![[9u8, 8], [7, 6]].into_dyn());
    }

    #[test]
    fn buffer_size_must_match_shape() {
        let value = reconstruct(&[2, 3], dtype("u1", "|"), false, Value::bytes(vec![0; 5]));
        assert!(matches!(
            NdArray::from_value(value),
            Err(PickleErr::Unexpected(_))
        ));
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let value = reconstruct(&[1 << 32, 1 << 32], dtype("u1", "|"), false, Value::bytes(vec![]));

        assert!(matches!(
            NdArray::from_value(value),
            Err(PickleErr::Unexpected(_))
        ));
    }

    #[test]
    fn wrong_dtype_for_u8() {
        let value = reconstruct(&[1], dtype("i2", "<"), false, Value::bytes(vec![0; 2]));
        let array = NdArray::from_value(value).unwrap();
        assert!(array.into_u8().is_err());
    }

    #[test]
    fn not_an_array() {
        let err = NdArray::from_value(Value::List(vec![])).unwrap_err();
        assert!(err.to_string().contains("list"));
    }
}
