use std::fmt::{self, Display, Formatter};

/// Opcodes understood by the VM. Semantics follow
/// <https://www.sqlite.org/opcode.html>.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
  Init,
  OpenRead,
  String8,
  Cast,
  IsNull,
  SeekGE,
  IdxGT,
  DeferredSeek,
  Column,
  ResultRow,
  Halt,
  Transaction,
  Goto,
  Next,
  Rewind,
  /// An opcode a front end may emit that this VM does not run.
  Unknown(String),
}

impl Opcode {
  pub fn from_name(name: &str) -> Opcode {
    match name {
      "Init" => Opcode::Init,
      "OpenRead" => Opcode::OpenRead,
      "String8" => Opcode::String8,
      "Cast" => Opcode::Cast,
      "IsNull" => Opcode::IsNull,
      "SeekGE" => Opcode::SeekGE,
      "IdxGT" => Opcode::IdxGT,
      "DeferredSeek" => Opcode::DeferredSeek,
      "Column" => Opcode::Column,
      "ResultRow" => Opcode::ResultRow,
      "Halt" => Opcode::Halt,
      "Transaction" => Opcode::Transaction,
      "Goto" => Opcode::Goto,
      "Next" => Opcode::Next,
      "Rewind" => Opcode::Rewind,
      other => Opcode::Unknown(other.to_string()),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Opcode::Init => "Init",
      Opcode::OpenRead => "OpenRead",
      Opcode::String8 => "String8",
      Opcode::Cast => "Cast",
      Opcode::IsNull => "IsNull",
      Opcode::SeekGE => "SeekGE",
      Opcode::IdxGT => "IdxGT",
      Opcode::DeferredSeek => "DeferredSeek",
      Opcode::Column => "Column",
      Opcode::ResultRow => "ResultRow",
      Opcode::Halt => "Halt",
      Opcode::Transaction => "Transaction",
      Opcode::Goto => "Goto",
      Opcode::Next => "Next",
      Opcode::Rewind => "Rewind",
      Opcode::Unknown(name) => name,
    }
  }
}

impl Display for Opcode {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// The fourth operand is either an integer or a string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Int(i64),
  Str(String),
}

impl Default for Operand {
  fn default() -> Self {
    Operand::Int(0)
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Operand::Int(value) => write!(f, "{}", value),
      Operand::Str(value) => write!(f, "{}", value),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
  pub opcode: Opcode,
  pub p1: i64,
  pub p2: i64,
  pub p3: i64,
  pub p4: Operand,
  pub p5: i64,
}

impl Instruction {
  pub fn new(opcode: Opcode, p1: i64, p2: i64, p3: i64, p4: i64, p5: i64) -> Self {
    Self {
      opcode,
      p1,
      p2,
      p3,
      p4: Operand::Int(p4),
      p5,
    }
  }

  pub fn with_str(
    opcode: Opcode,
    p1: i64,
    p2: i64,
    p3: i64,
    p4: impl Into<String>,
    p5: i64,
  ) -> Self {
    Self {
      opcode,
      p1,
      p2,
      p3,
      p4: Operand::Str(p4.into()),
      p5,
    }
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(
      f,
      "{:<13} {:<4} {:<4} {:<6} {:<14} {:02}",
      self.opcode.name(),
      self.p1,
      self.p2,
      self.p3,
      self.p4.to_string(),
      self.p5
    )
  }
}

/// A compiled statement: instructions plus what the caller needs to bind
/// arguments and label output columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
  pub instructions: Vec<Instruction>,
  pub num_placeholders: usize,
  pub columns: Vec<String>,
}

impl Display for Program {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    writeln!(f, "addr  opcode        p1   p2   p3     p4             p5")?;
    writeln!(f, "----  ------------- ---- ---- ------ -------------- --")?;
    for (addr, instruction) in self.instructions.iter().enumerate() {
      writeln!(f, "{:<5} {}", addr, instruction)?;
    }
    Ok(())
  }
}
