pub mod catalog;
pub mod program;
pub mod registers;

use std::cmp::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};

use self::program::{Instruction, Opcode, Operand, Program};
use self::registers::{Affinity, Registers};
use crate::btree::manager::TreeManager;
use crate::btree::record::Value;
use crate::btree::tree::Tree;
use crate::error::{Error, Result, VmError};

/// Rows buffered between the worker and the consumer before the worker
/// blocks.
pub const TUPLE_BUFFER_SIZE: usize = 100;

const MAX_CURSORS: usize = 256;
const MAX_REGISTERS: usize = 1 << 16;

/// One output row, in the order of [`Program::columns`].
pub type Row = Vec<Value>;

#[derive(Debug, Clone)]
pub struct VmConfig {
  /// Capacity of the row channel.
  pub row_buffer: usize,
}

impl Default for VmConfig {
  fn default() -> Self {
    Self {
      row_buffer: TUPLE_BUFFER_SIZE,
    }
  }
}

/// Runs programs against the trees of one database. Every call to
/// [`Vm::execute`] gets its own worker thread, cursors and registers.
pub struct Vm {
  trees: TreeManager,
  config: VmConfig,
}

impl Vm {
  pub fn new(trees: TreeManager) -> Self {
    Self::with_config(trees, VmConfig::default())
  }

  pub fn with_config(trees: TreeManager, config: VmConfig) -> Self {
    Self { trees, config }
  }

  pub fn execute(&self, program: Program) -> Result<Execution> {
    let (row_tx, row_rx) = crossbeam_channel::bounded(self.config.row_buffer);
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let columns = program.columns.clone();
    let machine = Machine::new(self.trees.clone(), row_tx);

    debug!(
      instructions = program.instructions.len(),
      columns = columns.len(),
      "starting execution"
    );
    let worker = thread::Builder::new()
      .name("sqlite-vm".into())
      .spawn(move || {
        let mut machine = machine;
        let result = machine.run(&program.instructions);
        // Hang up the row channel first so the consumer drains every row
        // before it can see completion.
        drop(machine);
        match &result {
          Ok(()) => debug!("execution finished"),
          Err(e) => debug!(error = %e, "execution failed"),
        }
        let _ = done_tx.send(result);
      })?;

    Ok(Execution {
      columns,
      rows: Some(row_rx),
      done: Some(done_rx),
      worker: Some(worker),
    })
  }
}

/// The consumer side of a running program.
///
/// Rows come out in the order the program produced them. Once they are
/// exhausted `next_row` reports how the program ended: `Ok(None)` when it
/// halted normally, the error otherwise.
pub struct Execution {
  columns: Vec<String>,
  rows: Option<Receiver<Row>>,
  done: Option<Receiver<Result<()>>>,
  worker: Option<JoinHandle<()>>,
}

impl Execution {
  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  /// Blocks until the next row is available or the program has ended.
  pub fn next_row(&mut self) -> Result<Option<Row>> {
    if let Some(rows) = &self.rows {
      match rows.recv() {
        Ok(row) => return Ok(Some(row)),
        Err(_) => self.rows = None,
      }
    }

    let Some(done) = self.done.take() else {
      return Ok(None);
    };
    let result = done.recv().map_err(|_| VmError::WorkerLost)?;
    self.join()?;
    result.map(|()| None)
  }

  /// Drops both channels and waits for the worker. A worker blocked on a
  /// full row channel sees the hang-up and stops.
  pub fn close(mut self) -> Result<()> {
    self.rows = None;
    self.done = None;
    self.join()
  }

  fn join(&mut self) -> Result<()> {
    match self.worker.take() {
      Some(worker) => worker.join().map_err(|_| Error::from(VmError::WorkerLost)),
      None => Ok(()),
    }
  }
}

impl Iterator for Execution {
  type Item = Result<Row>;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_row().transpose()
  }
}

enum Step {
  Continue,
  Jump(usize),
  Halt,
}

/// Interpreter state for one execution.
struct Machine {
  trees: TreeManager,
  cursors: Vec<Option<Tree>>,
  registers: Registers,
  row: Row,
  rows: Sender<Row>,
  len: usize,
}

impl Machine {
  fn new(trees: TreeManager, rows: Sender<Row>) -> Self {
    Self {
      trees,
      cursors: Vec::new(),
      registers: Registers::new(),
      row: Vec::new(),
      rows,
      len: 0,
    }
  }

  fn run(&mut self, instructions: &[Instruction]) -> Result<()> {
    self.len = instructions.len();
    let mut pc = 0;
    while let Some(instruction) = instructions.get(pc) {
      trace!(pc, %instruction, "dispatch");
      match self.step(pc, instruction)? {
        Step::Continue => pc += 1,
        Step::Jump(target) => pc = target,
        Step::Halt => break,
      }
    }
    Ok(())
  }

  // Opcodes are documented at https://www.sqlite.org/opcode.html
  fn step(&mut self, pc: usize, inst: &Instruction) -> Result<Step> {
    match &inst.opcode {
      Opcode::Init => {
        if inst.p2 != 0 {
          return self.jump(inst.p2);
        }
      }

      Opcode::Halt => return Ok(Step::Halt),

      Opcode::Transaction => {
        if inst.p1 != 0 {
          return Err(VmError::UnsupportedDatabase(inst.p1).into());
        }
        if inst.p2 != 0 {
          return Err(VmError::WriteTransaction.into());
        }
        let header = self.trees.header()?;
        if inst.p5 != 0 && inst.p3 != i64::from(header.schema_cookie) {
          return Err(
            VmError::SchemaMismatch {
              expected: inst.p3,
              actual: header.schema_cookie,
            }
            .into(),
          );
        }
      }

      Opcode::Goto => return self.jump(inst.p2),

      Opcode::OpenRead => {
        if inst.p3 != 0 {
          return Err(VmError::UnsupportedDatabase(inst.p3).into());
        }
        let slot = operand(inst, "p1", inst.p1, MAX_CURSORS, "a cursor slot below 256")?;
        let root_page = u32::try_from(inst.p2)
          .ok()
          .filter(|&page| page > 0)
          .ok_or_else(|| bad_operand(inst, "p2", "a root page number"))?;

        let tree = self.trees.open_tree(root_page)?;
        if self.cursors.len() <= slot {
          self.cursors.resize_with(slot + 1, || None);
        }
        self.cursors[slot] = Some(tree);
      }

      Opcode::Rewind => {
        let tree = self.cursor(inst)?;
        tree.reset_cursor();
        if !advance(tree)? {
          return self.jump(inst.p2);
        }
      }

      Opcode::Next => {
        if advance(self.cursor(inst)?)? {
          return self.jump(inst.p2);
        }
      }

      Opcode::Column => {
        let register = self.register(inst, "p3", inst.p3)?;
        let column = operand(inst, "p2", inst.p2, usize::MAX, "a column index")?;
        let value = self.record(inst, inst.p1)?.column(column).value();
        self.registers.set(register, value.clone().into());
        self.row.push(value);
      }

      Opcode::ResultRow => {
        let row = std::mem::take(&mut self.row);
        if self.rows.send(row).is_err() {
          debug!(pc, "consumer hung up, halting");
          return Ok(Step::Halt);
        }
      }

      Opcode::String8 => {
        let register = self.register(inst, "p2", inst.p2)?;
        let Operand::Str(value) = &inst.p4 else {
          return Err(bad_operand(inst, "p4", "a string").into());
        };
        self.registers.set_string(register, value.clone());
      }

      Opcode::Cast => {
        let register = self.register(inst, "p1", inst.p1)?;
        self.registers.cast(register, Affinity::from_code(inst.p2)?)?;
      }

      Opcode::IsNull => {
        let register = self.register(inst, "p1", inst.p1)?;
        if self.registers.get(register).is_null() {
          return self.jump(inst.p2);
        }
      }

      Opcode::SeekGE => {
        let key = self.key(inst)?;
        let tree = self.cursor(inst)?;
        if !tree.seek_ge(&key) {
          if let Some(e) = tree.take_error() {
            return Err(e);
          }
          return self.jump(inst.p2);
        }
      }

      Opcode::IdxGT => {
        let key = self.key(inst)?;
        if self.record(inst, inst.p1)?.compare_prefix(&key) == Ordering::Greater {
          return self.jump(inst.p2);
        }
      }

      Opcode::DeferredSeek => {
        let rowid = self.record(inst, inst.p1)?.rowid;
        let table = operand(inst, "p3", inst.p3, MAX_CURSORS, "a cursor slot below 256")?;
        let tree = self.cursor_at(table)?;
        if !tree.seek_rowid(rowid) {
          if let Some(e) = tree.take_error() {
            return Err(e);
          }
          return Err(VmError::CursorNotPositioned(table).into());
        }
      }

      Opcode::Unknown(name) => {
        return Err(
          VmError::UnknownOpcode {
            pc,
            opcode: name.clone(),
          }
          .into(),
        )
      }
    }
    Ok(Step::Continue)
  }

  fn jump(&self, target: i64) -> Result<Step> {
    match usize::try_from(target) {
      Ok(pc) if pc < self.len => Ok(Step::Jump(pc)),
      _ => Err(
        VmError::JumpOutOfRange {
          target,
          len: self.len,
        }
        .into(),
      ),
    }
  }

  fn register(&self, inst: &Instruction, name: &'static str, value: i64) -> Result<usize> {
    Ok(operand(inst, name, value, MAX_REGISTERS, "a register below 65536")?)
  }

  /// The cursor named by P1.
  fn cursor(&mut self, inst: &Instruction) -> Result<&mut Tree> {
    let slot = operand(inst, "p1", inst.p1, MAX_CURSORS, "a cursor slot below 256")?;
    self.cursor_at(slot)
  }

  fn cursor_at(&mut self, slot: usize) -> Result<&mut Tree> {
    self
      .cursors
      .get_mut(slot)
      .and_then(Option::as_mut)
      .ok_or_else(|| VmError::CursorNotOpen(slot).into())
  }

  fn record(&mut self, inst: &Instruction, slot: i64) -> Result<&crate::btree::record::Record> {
    let slot = operand(inst, "p1", slot, MAX_CURSORS, "a cursor slot below 256")?;
    let tree = self.cursor_at(slot)?;
    tree
      .get()
      .ok_or_else(|| VmError::CursorNotPositioned(slot).into())
  }

  /// The P4 registers starting at P3, as a search key.
  fn key(&self, inst: &Instruction) -> Result<Vec<Value>> {
    let start = self.register(inst, "p3", inst.p3)?;
    let count = match &inst.p4 {
      Operand::Int(n) => usize::try_from(*n)
        .ok()
        .filter(|&n| n <= MAX_REGISTERS - start)
        .ok_or_else(|| bad_operand(inst, "p4", "a register count"))?,
      Operand::Str(_) => return Err(bad_operand(inst, "p4", "a register count").into()),
    };
    Ok(
      (start..start + count.max(1))
        .map(|idx| self.registers.get(idx).to_value())
        .collect(),
    )
  }
}

/// Steps `tree` forward, surfacing any decode error it latched.
fn advance(tree: &mut Tree) -> Result<bool> {
  if tree.next() {
    return Ok(true);
  }
  match tree.take_error() {
    Some(e) => Err(e),
    None => Ok(false),
  }
}

fn operand(
  inst: &Instruction,
  name: &'static str,
  value: i64,
  limit: usize,
  expected: &'static str,
) -> std::result::Result<usize, VmError> {
  usize::try_from(value)
    .ok()
    .filter(|&idx| idx < limit)
    .ok_or_else(|| bad_operand(inst, name, expected))
}

fn bad_operand(inst: &Instruction, name: &'static str, expected: &'static str) -> VmError {
  VmError::BadOperand {
    opcode: inst.opcode.name().to_string(),
    operand: name,
    expected,
  }
}
