use std::{sync::Arc, thread};

use crate::{
    Event, EventSink, ExecutionState, FaultKind, FaultSource, INFERENCE_REGISTER,
    Inference, Op, Operand, Program, RuntimeFault, SharedMemory, SharedRegisters,
    SlotHandle, StopSignal, ThreadContext, ThreadHost, ThreadId, VMSettings, Value,
    ping,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Halted,
    Faulted,
}

/// Final report of one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: EngineState,
    pub fault: Option<RuntimeFault>,
    pub steps: u64,
    /// Evaluation stack at the end, oldest first.
    pub stack: Vec<Value>,
    /// Register file at the end, in allocation order.
    pub registers: Vec<(String, Value)>,
}

impl RunOutcome {
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state == EngineState::Halted
    }

    pub(crate) fn panicked() -> Self {
        Self {
            state: EngineState::Faulted,
            fault: Some(RuntimeFault::new(0, FaultKind::Panicked)),
            steps: 0,
            stack: Vec::new(),
            registers: Vec::new(),
        }
    }
}

/// What a handler asks the dispatch loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Normal,
    Jump(usize),
    /// Run the same instruction again.
    Retry,
    Halt,
}

/// Everything the engines of one run have in common.
pub struct EngineShared {
    pub settings: VMSettings,
    pub sink: Arc<dyn EventSink>,
    pub inference: Arc<dyn Inference>,
    pub stop: Arc<StopSignal>,
    pub host: Arc<ThreadHost>,
}

/// One fetch-decode-execute loop. Stacks are private; registers and memory
/// may be shared with other engines depending on the spawn isolation.
pub struct Interpreter {
    thread: ThreadId,
    program: Arc<Program>,
    shared: Arc<EngineShared>,

    pc: usize,
    state: ExecutionState,
    status: EngineState,
    fault: Option<RuntimeFault>,

    registers: SharedRegisters,
    memory: SharedMemory,
    faults: FaultSource,

    ping_attempts: u32,
    steps: u64,
}

impl Interpreter {
    pub fn new(
        thread: ThreadId,
        program: Arc<Program>,
        shared: Arc<EngineShared>,
        context: ThreadContext,
    ) -> Self {
        let state = ExecutionState::new(&shared.settings.execution_state_info());
        Self {
            thread,
            program,
            shared,
            pc: context.entry,
            state,
            status: EngineState::Idle,
            fault: None,
            registers: context.registers,
            memory: context.memory,
            faults: context.faults,
            ping_attempts: 0,
            steps: 0,
        }
    }

    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    #[must_use]
    pub fn status(&self) -> EngineState {
        self.status
    }

    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    #[must_use]
    pub fn execution_state(&self) -> &ExecutionState {
        &self.state
    }

    #[must_use]
    pub fn registers(&self) -> &SharedRegisters {
        &self.registers
    }

    #[must_use]
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    #[must_use]
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.shared.stop)
    }

    #[must_use]
    pub fn host(&self) -> Arc<ThreadHost> {
        Arc::clone(&self.shared.host)
    }

    /// Runs until the engine halts or faults.
    pub fn run(mut self) -> RunOutcome {
        log::info!("{}: running from pc {}", self.thread, self.pc);
        while self.step() {}
        let outcome = self.outcome();
        log::info!(
            "{}: {:?} after {} steps",
            self.thread,
            outcome.state,
            outcome.steps
        );
        outcome
    }

    /// Executes one instruction. Returns `false` once the engine has left
    /// the running state.
    pub fn step(&mut self) -> bool {
        match self.status {
            EngineState::Idle => self.status = EngineState::Running,
            EngineState::Running => {}
            EngineState::Halted | EngineState::Faulted => return false,
        }

        if self.shared.stop.is_stopped() {
            log::debug!("{}: stop requested at pc {}", self.thread, self.pc);
            self.halt();
            return false;
        }
        if let Some(limit) = self.shared.settings.max_steps {
            if self.steps >= limit {
                self.fault(FaultKind::StepLimitExceeded(limit));
                return false;
            }
        }

        let program = Arc::clone(&self.program);
        // running off the end is an implicit END
        let Some(instruction) = program.get(self.pc) else {
            self.halt();
            return false;
        };
        self.steps += 1;

        let result = match instruction.op() {
            Ok(op) => {
                log::trace!("{} pc {}: {instruction}", self.thread, self.pc);
                self.execute(op, &instruction.operands)
            }
            Err(byte) => Err(FaultKind::InvalidOpcode(byte)),
        };

        match result {
            Ok(ExecutionResult::Normal) => {
                self.ping_attempts = 0;
                self.pc += 1;
                true
            }
            Ok(ExecutionResult::Jump(target)) => {
                self.ping_attempts = 0;
                self.pc = target;
                true
            }
            Ok(ExecutionResult::Retry) => true,
            Ok(ExecutionResult::Halt) => {
                self.halt();
                false
            }
            Err(kind) => {
                self.fault(kind);
                false
            }
        }
    }

    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            state: self.status,
            fault: self.fault.clone(),
            steps: self.steps,
            stack: self.state.stack.to_vec(),
            registers: self.registers.lock().snapshot(),
        }
    }

    fn execute(
        &mut self,
        op: Op,
        operands: &[Operand],
    ) -> Result<ExecutionResult, FaultKind> {
        match op {
            Op::Optimize => {
                let removed = self.state.stack.dedup();
                log::trace!("{}: optimize dropped {removed}", self.thread);
            }
            Op::AllocReg => {
                let name = register_operand(op, operands)?;
                self.registers.lock().allocate(name);
            }
            Op::FlowCmp => {
                let window = match operands.first() {
                    None => self.state.stack.capacity(),
                    Some(Operand::Literal(Value::Integer(count))) => {
                        usize::try_from(*count).map_err(|_| {
                            FaultKind::InvalidOperand(format!("negative count {count}"))
                        })?
                    }
                    Some(other) => {
                        return Err(FaultKind::InvalidOperand(format!(
                            "FLOWCMP count {other}"
                        )));
                    }
                };
                self.state.stack.compact(window);
            }
            Op::Release => self.state.stack.clear(),
            Op::Ping => return self.ping(operands),
            Op::Sift => {
                let evicted = self.registers.lock().sweep();
                log::debug!("{}: sift evicted {evicted:?}", self.thread);
                self.emit(Event::Evicted(evicted));
            }
            Op::Infer => {
                let payload = operands
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                let result = self.shared.inference.infer(&payload);
                self.registers.lock().write(INFERENCE_REGISTER, result);
            }
            Op::Pause => {
                let quantum = self.shared.settings.pause_quantum;
                if quantum.is_zero() {
                    thread::yield_now();
                } else {
                    self.shared.stop.wait_timeout(quantum);
                }
            }
            Op::Write => {
                let name = register_operand(op, operands)?;
                let mut registers = self.registers.lock();
                let value = match operands.get(1) {
                    Some(Operand::Literal(value)) => value.clone(),
                    Some(Operand::Register(source)) => registers.read(source).or_zero(),
                    _ => {
                        return Err(FaultKind::InvalidOperand(
                            "WRITE expects a value".to_string(),
                        ));
                    }
                };
                registers.write(name, value);
            }
            Op::Read => {
                let name = register_operand(op, operands)?;
                let value = {
                    let mut registers = self.registers.lock();
                    registers.allocate(name);
                    registers.read(name).or_zero()
                };
                self.state.push(value);
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.state.push(arithmetic(op, left, right)?);
            }
            Op::Jump => {
                return Ok(ExecutionResult::Jump(target_operand(op, operands)?));
            }
            Op::Jz | Op::Jnz => {
                let target = target_operand(op, operands)?;
                let value = self.pop()?;
                let zero = value.is_zero().ok_or(FaultKind::WrongType {
                    op: op.mnemonic(),
                    found: value.type_name(),
                })?;
                if zero == (op == Op::Jz) {
                    return Ok(ExecutionResult::Jump(target));
                }
            }
            Op::Print => {
                let value = self.pop()?;
                self.emit(Event::Printed(value));
            }
            Op::Call => {
                let target = target_operand(op, operands)?;
                self.state
                    .calls
                    .push(self.pc + 1)
                    .ok_or(FaultKind::CallStackOverflow)?;
                return Ok(ExecutionResult::Jump(target));
            }
            Op::Ret => {
                let target = self
                    .state
                    .calls
                    .pop()
                    .ok_or(FaultKind::CallStackUnderflow)?;
                return Ok(ExecutionResult::Jump(target));
            }
            Op::Thread => {
                let entry = target_operand(op, operands)?;
                let id = self.spawn(entry)?;
                self.state.push(Value::Integer(id.0 as i64));
            }
            Op::Join => self.join()?,
            Op::Alloc => {
                let value = self.pop()?;
                let handle = self.memory.lock().allocate(value);
                self.state.push(Value::Handle(handle));
            }
            Op::Free => {
                let handle = self.pop_handle(op)?;
                self.memory.lock().free(handle)?;
            }
            Op::Load => {
                let handle = self.pop_handle(op)?;
                let value = self.memory.lock().read(handle)?.clone();
                self.state.push(value);
            }
            Op::Store => {
                let value = self.pop()?;
                let handle = self.pop_handle(op)?;
                self.memory.lock().write(handle, value)?;
                self.state.push(Value::Handle(handle));
            }
            Op::End => return Ok(ExecutionResult::Halt),
        }
        Ok(ExecutionResult::Normal)
    }

    fn ping(&mut self, operands: &[Operand]) -> Result<ExecutionResult, FaultKind> {
        let forced = operands
            .iter()
            .any(|operand| matches!(operand, Operand::Word(word) if word.eq_ignore_ascii_case("fail")));
        let policy = self.shared.settings.ping;
        if !forced && !policy.signals(&mut *self.faults) {
            return Ok(ExecutionResult::Normal);
        }

        self.ping_attempts += 1;
        if self.ping_attempts > policy.max_retries {
            return Err(FaultKind::PingRetriesExhausted {
                attempts: self.ping_attempts,
            });
        }
        log::debug!(
            "{}: ping fault at pc {}, retry {}",
            self.thread,
            self.pc,
            self.ping_attempts
        );
        self.emit(Event::Retried {
            pc: self.pc,
            attempt: self.ping_attempts,
        });
        self.shared.stop.wait_timeout(policy.backoff);
        Ok(ExecutionResult::Retry)
    }

    fn spawn(&mut self, entry: usize) -> Result<ThreadId, FaultKind> {
        let context = ThreadContext::new(
            entry,
            &self.registers,
            &self.memory,
            self.shared.settings.isolation,
            ping::fork(&mut self.faults),
        );
        let program = Arc::clone(&self.program);
        let shared = Arc::clone(&self.shared);
        let id = self.shared.host.spawn(move |id| {
            Interpreter::new(id, program, shared, context).run()
        })?;
        self.emit(Event::Spawned { thread: id, entry });
        Ok(id)
    }

    fn join(&mut self) -> Result<(), FaultKind> {
        let value = self.pop()?;
        let Value::Integer(raw) = value else {
            return Err(FaultKind::WrongType {
                op: Op::Join.mnemonic(),
                found: value.type_name(),
            });
        };
        let id = u64::try_from(raw)
            .map(ThreadId)
            .map_err(|_| FaultKind::UnknownThread(raw))?;
        let outcome = self.shared.host.join(self.thread, id)?;
        log::debug!("{}: joined {id}, {:?}", self.thread, outcome.state);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, FaultKind> {
        self.state.pop().ok_or(FaultKind::StackUnderflow)
    }

    fn pop_handle(&mut self, op: Op) -> Result<SlotHandle, FaultKind> {
        match self.pop()? {
            Value::Handle(handle) => Ok(handle),
            other => Err(FaultKind::WrongType {
                op: op.mnemonic(),
                found: other.type_name(),
            }),
        }
    }

    fn halt(&mut self) {
        self.status = EngineState::Halted;
        self.emit(Event::Halted);
    }

    fn fault(&mut self, kind: FaultKind) {
        let fault = RuntimeFault::new(self.pc, kind);
        log::warn!("{}: {fault}", self.thread);
        self.status = EngineState::Faulted;
        self.fault = Some(fault.clone());
        self.emit(Event::Faulted(fault));
    }

    fn emit(&self, event: Event) {
        self.shared.sink.emit(self.thread, event);
    }
}

fn register_operand(op: Op, operands: &[Operand]) -> Result<&str, FaultKind> {
    match operands.first() {
        Some(Operand::Register(name)) => Ok(name),
        _ => Err(FaultKind::InvalidOperand(format!(
            "{} expects a register",
            op.mnemonic()
        ))),
    }
}

fn target_operand(op: Op, operands: &[Operand]) -> Result<usize, FaultKind> {
    match operands.first() {
        Some(Operand::Target(pc)) => Ok(*pc),
        _ => Err(FaultKind::InvalidOperand(format!(
            "{} expects a target",
            op.mnemonic()
        ))),
    }
}

fn arithmetic(op: Op, left: Value, right: Value) -> Result<Value, FaultKind> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => integer_op(op, a, b).map(Value::Integer),
        (Value::Integer(a), Value::Float(b)) => float_op(op, a as f64, b).map(Value::Float),
        (Value::Float(a), Value::Integer(b)) => float_op(op, a, b as f64).map(Value::Float),
        (Value::Float(a), Value::Float(b)) => float_op(op, a, b).map(Value::Float),
        (left, right) => Err(FaultKind::TypeMismatch {
            op: op.mnemonic(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn integer_op(op: Op, a: i64, b: i64) -> Result<i64, FaultKind> {
    match op {
        Op::Div | Op::Mod if b == 0 => Err(FaultKind::DivisionByZero),
        Op::Add => a.checked_add(b).ok_or(FaultKind::Overflow),
        Op::Sub => a.checked_sub(b).ok_or(FaultKind::Overflow),
        Op::Mul => a.checked_mul(b).ok_or(FaultKind::Overflow),
        Op::Div => a.checked_div(b).ok_or(FaultKind::Overflow),
        Op::Mod => a.checked_rem(b).ok_or(FaultKind::Overflow),
        _ => Err(FaultKind::InvalidOperand(format!(
            "{} is not arithmetic",
            op.mnemonic()
        ))),
    }
}

fn float_op(op: Op, a: f64, b: f64) -> Result<f64, FaultKind> {
    match op {
        Op::Div | Op::Mod if b == 0.0 => Err(FaultKind::DivisionByZero),
        Op::Add => Ok(a + b),
        Op::Sub => Ok(a - b),
        Op::Mul => Ok(a * b),
        Op::Div => Ok(a / b),
        Op::Mod => Ok(a % b),
        _ => Err(FaultKind::InvalidOperand(format!(
            "{} is not arithmetic",
            op.mnemonic()
        ))),
    }
}
