use bytes::Bytes;

use crate::btree::record::Value;
use crate::error::VmError;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Register {
  #[default]
  Null,
  Int(i64),
  Float(f64),
  Str(String),
  Blob(Bytes),
}

impl Register {
  pub fn type_name(&self) -> &'static str {
    match self {
      Register::Null => "null",
      Register::Int(_) => "integer",
      Register::Float(_) => "real",
      Register::Str(_) => "text",
      Register::Blob(_) => "blob",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Register::Null)
  }

  pub fn to_value(&self) -> Value {
    match self {
      Register::Null => Value::Null,
      Register::Int(v) => Value::Integer(*v),
      Register::Float(v) => Value::Float(*v),
      Register::Str(v) => Value::Text(v.clone()),
      Register::Blob(v) => Value::Blob(v.clone()),
    }
  }
}

impl From<Value> for Register {
  fn from(value: Value) -> Self {
    match value {
      Value::Null => Register::Null,
      Value::Integer(v) => Register::Int(v),
      Value::Float(v) => Register::Float(v),
      Value::Text(v) => Register::Str(v),
      Value::Blob(v) => Register::Blob(v),
    }
  }
}

/// Column affinities, as coded in the P2 operand of `Cast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
  Blob,
  Text,
  Integer,
  Real,
}

impl Affinity {
  pub fn from_code(code: i64) -> Result<Self, VmError> {
    match u8::try_from(code).map(char::from) {
      Ok('A') => Ok(Affinity::Blob),
      Ok('B') => Ok(Affinity::Text),
      Ok('D') => Ok(Affinity::Integer),
      Ok('E') => Ok(Affinity::Real),
      _ => Err(VmError::UnknownAffinity(code)),
    }
  }

  fn type_name(&self) -> &'static str {
    match self {
      Affinity::Blob => "blob",
      Affinity::Text => "text",
      Affinity::Integer => "integer",
      Affinity::Real => "real",
    }
  }
}

/// Real-to-text conversion. Whole numbers keep a trailing `.0` so they read
/// back as reals.
pub fn format_real(value: f64) -> String {
  if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
    format!("{:.1}", value)
  } else {
    format!("{}", value)
  }
}

static NULL: Register = Register::Null;

/// The VM's scratch space. Slots are created on first write; the backing
/// storage doubles whenever a write lands past the end.
#[derive(Debug, Default)]
pub struct Registers {
  slots: Vec<Register>,
}

impl Registers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// Slots that were never written read as NULL.
  pub fn get(&self, idx: usize) -> &Register {
    self.slots.get(idx).unwrap_or(&NULL)
  }

  pub fn set(&mut self, idx: usize, register: Register) {
    self.resize(idx);
    self.slots[idx] = register;
  }

  pub fn set_null(&mut self, idx: usize) {
    self.set(idx, Register::Null);
  }

  pub fn set_int(&mut self, idx: usize, value: i64) {
    self.set(idx, Register::Int(value));
  }

  pub fn set_float(&mut self, idx: usize, value: f64) {
    self.set(idx, Register::Float(value));
  }

  pub fn set_string(&mut self, idx: usize, value: impl Into<String>) {
    self.set(idx, Register::Str(value.into()));
  }

  pub fn set_blob(&mut self, idx: usize, value: impl Into<Bytes>) {
    self.set(idx, Register::Blob(value.into()));
  }

  /// Converts register `idx` in place. NULL stays NULL whatever the target.
  /// Integers and reals never convert to blobs.
  pub fn cast(&mut self, idx: usize, to: Affinity) -> Result<(), VmError> {
    let slot = self.slots.get_mut(idx).ok_or(VmError::UnknownRegister(idx))?;

    let cast = match (&*slot, to) {
      (Register::Null, _) => None,
      (Register::Int(_), Affinity::Integer)
      | (Register::Float(_), Affinity::Real)
      | (Register::Str(_), Affinity::Text)
      | (Register::Blob(_), Affinity::Blob) => None,

      (Register::Float(v), Affinity::Integer) => Some(Register::Int(*v as i64)),
      (Register::Int(v), Affinity::Real) => Some(Register::Float(*v as f64)),

      (Register::Int(v), Affinity::Text) => Some(Register::Str(v.to_string())),
      (Register::Float(v), Affinity::Text) => Some(Register::Str(format_real(*v))),
      (Register::Blob(v), Affinity::Text) => {
        Some(Register::Str(String::from_utf8_lossy(v).into_owned()))
      }
      (Register::Str(v), Affinity::Blob) => {
        Some(Register::Blob(Bytes::from(v.clone().into_bytes())))
      }

      (from, to) => {
        return Err(VmError::UnsupportedCast {
          register: idx,
          from: from.type_name(),
          to: to.type_name(),
        })
      }
    };

    if let Some(register) = cast {
      *slot = register;
    }
    Ok(())
  }

  fn resize(&mut self, idx: usize) {
    if idx < self.slots.len() {
      return;
    }
    let mut n = self.slots.len().max(1);
    while idx >= n {
      n *= 2;
    }
    self.slots.resize(n, Register::Null);
  }
}
