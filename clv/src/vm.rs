use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    AliasTable, CompileError, Compiler, EchoInference, EngineShared, EventSink,
    ExecutionStateInfo, FaultSource, Inference, Interpreter, Isolation, LogSink,
    MemoryManager, OpcodeTable, PingPolicy, Program, RegisterFile, RunOutcome,
    RuntimeFault, SplitMix64, StopSignal, ThreadContext, ThreadHost, ThreadId,
    heap::DEFAULT_PAGE_SIZE,
};

/// Overrides for [`VMSettings`]. Every `None` keeps the default.
#[derive(Debug, Default, Clone)]
pub struct VMCreateInfo {
    pub stack_size: Option<usize>,
    pub return_stack_size: Option<usize>,
    pub page_size: Option<usize>,
    pub ping_probability: Option<f64>,
    pub ping_retries: Option<u32>,
    pub ping_backoff: Option<Duration>,
    pub pause_quantum: Option<Duration>,
    pub isolation: Option<Isolation>,
    pub seed: Option<u64>,
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VMSettings {
    pub stack_size: usize,
    pub return_stack_size: usize,
    pub page_size: usize,
    pub ping: PingPolicy,
    pub pause_quantum: Duration,
    pub isolation: Isolation,
    pub seed: Option<u64>,
    pub max_steps: Option<u64>,
}

impl Default for VMSettings {
    fn default() -> Self {
        let state = ExecutionStateInfo::default();
        Self {
            stack_size: state.stack_size,
            return_stack_size: state.return_stack_size,
            page_size: DEFAULT_PAGE_SIZE,
            ping: PingPolicy::default(),
            pause_quantum: Duration::from_millis(250),
            isolation: Isolation::default(),
            seed: None,
            max_steps: None,
        }
    }
}

impl VMSettings {
    #[must_use]
    pub fn from_info(info: &VMCreateInfo) -> Self {
        let mut settings = VMSettings::default();
        info.stack_size
            .inspect(|&val| settings.stack_size = val.max(1));
        info.return_stack_size
            .inspect(|&val| settings.return_stack_size = val);
        info.page_size.inspect(|&val| settings.page_size = val.max(1));
        info.ping_probability
            .inspect(|&val| settings.ping.probability = val.clamp(0.0, 1.0));
        info.ping_retries
            .inspect(|&val| settings.ping.max_retries = val);
        info.ping_backoff.inspect(|&val| settings.ping.backoff = val);
        info.pause_quantum
            .inspect(|&val| settings.pause_quantum = val);
        info.isolation.inspect(|&val| settings.isolation = val);
        settings.seed = info.seed;
        settings.max_steps = info.max_steps;
        settings
    }

    #[must_use]
    pub fn execution_state_info(&self) -> ExecutionStateInfo {
        ExecutionStateInfo {
            stack_size: self.stack_size,
            return_stack_size: self.return_stack_size,
        }
    }
}

/// Compiles and runs programs. Holds the immutable tables and the
/// collaborators every run is wired to.
pub struct VM {
    opcodes: OpcodeTable,
    aliases: AliasTable,
    settings: VMSettings,
    sink: Arc<dyn EventSink>,
    inference: Arc<dyn Inference>,
}

impl VM {
    #[must_use]
    pub fn new(info: VMCreateInfo) -> Self {
        Self {
            opcodes: OpcodeTable::standard(),
            aliases: AliasTable::standard(),
            settings: VMSettings::from_info(&info),
            sink: Arc::new(LogSink),
            inference: Arc::new(EchoInference),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_inference(mut self, inference: Arc<dyn Inference>) -> Self {
        self.inference = inference;
        self
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &VMSettings {
        &self.settings
    }

    #[must_use]
    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.opcodes, &self.aliases)
    }

    pub fn compile<S: AsRef<str>>(
        &self,
        lines: &[S],
    ) -> Result<Program, CompileError> {
        self.compiler().compile(lines)
    }

    pub fn compile_source(&self, source: &str) -> Result<Program, CompileError> {
        self.compiler().compile_source(source)
    }

    /// Main engine for `program`, wired to a fresh stop signal and thread
    /// host. Nothing runs until it is stepped.
    #[must_use]
    pub fn interpreter(&self, program: Program) -> Interpreter {
        let faults = self.fault_source();
        self.interpreter_with_faults(program, faults)
    }

    #[must_use]
    pub fn interpreter_with_faults(
        &self,
        program: Program,
        faults: FaultSource,
    ) -> Interpreter {
        let shared = Arc::new(EngineShared {
            settings: self.settings,
            sink: Arc::clone(&self.sink),
            inference: Arc::clone(&self.inference),
            stop: Arc::new(StopSignal::new()),
            host: Arc::new(ThreadHost::new()),
        });
        let context = ThreadContext {
            entry: 0,
            registers: Arc::new(Mutex::new(RegisterFile::new())),
            memory: Arc::new(Mutex::new(MemoryManager::new(self.settings.page_size))),
            faults,
        };
        Interpreter::new(ThreadId::MAIN, Arc::new(program), shared, context)
    }

    /// Starts `program` on its own thread.
    pub fn run(&self, program: Program) -> io::Result<RunHandle> {
        self.spawn(self.interpreter(program))
    }

    pub fn spawn(&self, interpreter: Interpreter) -> io::Result<RunHandle> {
        let stop = interpreter.stop_signal();
        let host = interpreter.host();
        let main = thread::Builder::new()
            .name("clv-main".to_string())
            .spawn(move || interpreter.run())?;
        Ok(RunHandle { stop, host, main })
    }

    /// Runs `program` on the calling thread, then waits for every thread it
    /// spawned.
    pub fn execute(&self, program: Program) -> RunResult {
        let interpreter = self.interpreter(program);
        let host = interpreter.host();
        let main = interpreter.run();
        RunResult {
            main,
            threads: host.join_all(),
        }
    }

    fn fault_source(&self) -> FaultSource {
        match self.settings.seed {
            Some(seed) => Box::new(SplitMix64::new(seed)),
            None => Box::new(SplitMix64::from_entropy()),
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(VMCreateInfo::default())
    }
}

/// A program running in the background.
#[derive(Debug)]
pub struct RunHandle {
    stop: Arc<StopSignal>,
    host: Arc<ThreadHost>,
    main: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Asks every engine of the run to halt before its next instruction.
    pub fn stop(&self) {
        self.stop.request_stop();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.main.is_finished()
    }

    pub fn join(self) -> RunResult {
        let main = self.main.join().unwrap_or_else(|_| {
            log::error!("main engine panicked");
            RunOutcome::panicked()
        });
        RunResult {
            main,
            threads: self.host.join_all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub main: RunOutcome,
    /// Spawned threads, ordered by id.
    pub threads: Vec<(ThreadId, RunOutcome)>,
}

impl RunResult {
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&RunOutcome> {
        if id == ThreadId::MAIN {
            return Some(&self.main);
        }
        self.threads
            .iter()
            .find(|(thread, _)| *thread == id)
            .map(|(_, outcome)| outcome)
    }

    /// Every fault of the run, main thread first.
    pub fn faults(&self) -> impl Iterator<Item = (ThreadId, &RuntimeFault)> {
        std::iter::once((ThreadId::MAIN, &self.main))
            .chain(self.threads.iter().map(|(id, outcome)| (*id, outcome)))
            .filter_map(|(id, outcome)| outcome.fault.as_ref().map(|fault| (id, fault)))
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.faults().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CompileError, EngineState, Event, EventLog, FaultKind, SymbolKind, Value,
    };

    fn vm_with(info: VMCreateInfo) -> (VM, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let vm = VM::new(VMCreateInfo {
            seed: Some(11),
            ..info
        })
        .with_sink(log.clone());
        (vm, log)
    }

    fn fault_kind(outcome: &RunOutcome) -> Option<&FaultKind> {
        outcome.fault.as_ref().map(|fault| &fault.kind)
    }

    #[test]
    fn test_settings_from_info() {
        let settings = VMSettings::from_info(&VMCreateInfo {
            stack_size: Some(0),
            page_size: Some(16),
            ping_probability: Some(4.0),
            isolation: Some(Isolation::Shared),
            seed: Some(3),
            ..Default::default()
        });
        assert_eq!(settings.stack_size, 1);
        assert_eq!(settings.return_stack_size, 1024);
        assert_eq!(settings.page_size, 16);
        assert_eq!(settings.ping.probability, 1.0);
        assert_eq!(settings.ping.max_retries, 3);
        assert_eq!(settings.pause_quantum, Duration::from_millis(250));
        assert_eq!(settings.isolation, Isolation::Shared);
        assert_eq!(settings.seed, Some(3));

        let defaults = VMSettings::default();
        assert_eq!(defaults.stack_size, 256);
        assert_eq!(defaults.page_size, 256);
        assert_eq!(defaults.max_steps, None);
    }

    #[test]
    fn test_scenario_a_prints_sum() {
        let (vm, log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&[
                "WRITE x 10", "WRITE y 20", "READ x", "READ y", "ADD", "PRINT", "END",
            ])
            .unwrap();
        let result = vm.execute(program);

        assert!(result.is_clean());
        assert_eq!(result.main.state, EngineState::Halted);
        assert_eq!(
            log.snapshot(),
            vec![
                (ThreadId::MAIN, Event::Printed(Value::Integer(30))),
                (ThreadId::MAIN, Event::Halted),
            ]
        );
    }

    #[test]
    fn test_scenario_b_unresolved_label() {
        let (vm, _log) = vm_with(VMCreateInfo::default());
        let err = vm.compile(&["READ x", "JZ nowhere", "END"]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedSymbol {
                line: 2,
                kind: SymbolKind::Label,
                name: "nowhere".into(),
            }
        );
    }

    #[test]
    fn test_scenario_c_division_by_zero() {
        let (vm, log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&["WRITE a 5", "WRITE b 0", "READ a", "READ b", "DIV", "PRINT", "END"])
            .unwrap();
        let result = vm.execute(program);

        assert_eq!(result.main.state, EngineState::Faulted);
        assert_eq!(
            result.main.fault,
            Some(RuntimeFault::new(4, FaultKind::DivisionByZero))
        );
        assert!(log.printed().is_empty());
    }

    #[test]
    fn test_scenario_d_ret_without_call() {
        let (vm, _log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&["CALL f", "WRITE done 1", "FUNC f", "WRITE x 1", "RET"])
            .unwrap();
        let result = vm.execute(program);

        assert_eq!(
            result.main.fault,
            Some(RuntimeFault::new(3, FaultKind::CallStackUnderflow))
        );
        assert!(
            result
                .main
                .registers
                .contains(&("done".to_string(), Value::Integer(1)))
        );
    }

    #[test]
    fn test_scenario_e_allocation_spills_to_second_page() {
        let (vm, _log) = vm_with(VMCreateInfo::default());
        let mut lines = vec!["WRITE v 7".to_string()];
        for _ in 0..257 {
            lines.push("READ v".to_string());
            lines.push("ALLOC".to_string());
        }
        lines.push("END".to_string());

        let program = vm.compile(&lines).unwrap();
        let interpreter = vm.interpreter(program);
        let memory = Arc::clone(interpreter.memory());
        let outcome = interpreter.run();

        assert!(outcome.is_halted());
        let memory = memory.lock();
        assert_eq!(memory.page_count(), 2);
        assert_eq!(memory.used_slots(), 257);
        let Some(Value::Handle(last)) = outcome.stack.last() else {
            panic!("expected a handle on top, got {:?}", outcome.stack.last());
        };
        assert_eq!((last.page(), last.slot()), (1, 0));
    }

    const SPAWN_AND_READ: &[&str] = &[
        "WRITE x 1",
        "THREAD worker",
        "JOIN",
        "READ x",
        "PRINT",
        "END",
        "LABEL worker",
        "WRITE x 99",
        "END",
    ];

    #[test]
    fn test_isolated_thread_works_on_a_copy() {
        let (vm, log) = vm_with(VMCreateInfo::default());
        let result = vm.execute(vm.compile(SPAWN_AND_READ).unwrap());

        assert!(result.is_clean());
        assert_eq!(log.for_thread(ThreadId::MAIN)[0], Event::Spawned {
            thread: ThreadId(1),
            entry: 6,
        });
        assert_eq!(log.printed(), vec![Value::Integer(1)]);

        let child = result.thread(ThreadId(1)).unwrap();
        assert!(child.is_halted());
        assert_eq!(child.registers, vec![("x".to_string(), Value::Integer(99))]);
    }

    #[test]
    fn test_shared_thread_sees_parent_registers() {
        let (vm, log) = vm_with(VMCreateInfo {
            isolation: Some(Isolation::Shared),
            ..Default::default()
        });
        let result = vm.execute(vm.compile(SPAWN_AND_READ).unwrap());

        assert!(result.is_clean());
        assert_eq!(log.printed(), vec![Value::Integer(99)]);
        assert_eq!(result.threads.len(), 1);
    }

    #[test]
    fn test_thread_can_start_at_function() {
        let (vm, log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&[
                "THREAD job",
                "JOIN",
                "END",
                "FUNC job",
                "WRITE msg 'from job'",
                "READ msg",
                "PRINT",
            ])
            .unwrap();
        let result = vm.execute(program);

        assert!(result.is_clean());
        assert_eq!(
            log.for_thread(ThreadId(1)),
            vec![Event::Printed(Value::Text("from job".into())), Event::Halted]
        );
    }

    #[test]
    fn test_child_fault_does_not_fault_parent() {
        let (vm, log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&[
                "THREAD bad",
                "JOIN",
                "WRITE ok 1",
                "READ ok",
                "PRINT",
                "END",
                "LABEL bad",
                "RET",
            ])
            .unwrap();
        let result = vm.execute(program);

        assert!(result.main.is_halted());
        assert_eq!(log.printed(), vec![Value::Integer(1)]);
        assert_eq!(
            result.faults().collect::<Vec<_>>(),
            vec![(
                ThreadId(1),
                &RuntimeFault::new(6, FaultKind::CallStackUnderflow)
            )]
        );
        assert!(!result.is_clean());
    }

    #[test]
    fn test_two_engines_join_the_same_thread() {
        let (vm, _log) = vm_with(VMCreateInfo {
            pause_quantum: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let program = vm
            .compile(&[
                "THREAD worker",
                "THREAD joiner",
                "RELEASE",
                "PAUSE",
                "WRITE t 1",
                "READ t",
                "JOIN",
                "END",
                "LABEL worker",
                "PAUSE",
                "PAUSE",
                "PAUSE",
                "END",
                "LABEL joiner",
                "WRITE id 1",
                "READ id",
                "JOIN",
                "END",
            ])
            .unwrap();
        let result = vm.execute(program);

        assert!(result.is_clean());
        assert!(result.main.is_halted());
        assert_eq!(result.threads.len(), 2);
        assert!(result.threads.iter().all(|(_, outcome)| outcome.is_halted()));
    }

    #[test]
    fn test_mutual_join_faults_one_side() {
        let (vm, _log) = vm_with(VMCreateInfo {
            pause_quantum: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let program = vm
            .compile(&[
                "THREAD a",
                "THREAD b",
                "END",
                "LABEL a",
                "PAUSE",
                "WRITE peer 2",
                "READ peer",
                "JOIN",
                "END",
                "LABEL b",
                "WRITE peer 1",
                "READ peer",
                "JOIN",
                "END",
            ])
            .unwrap();
        let result = vm.execute(program);

        assert!(result.main.is_halted());
        let kinds: Vec<_> = result
            .faults()
            .map(|(_, fault)| fault.kind.clone())
            .collect();
        assert_eq!(kinds.len(), 1);
        assert!(matches!(kinds[0], FaultKind::JoinCycle(_)));
    }

    #[test]
    fn test_unjoined_threads_are_collected() {
        let (vm, _log) = vm_with(VMCreateInfo::default());
        let program = vm
            .compile(&[
                "THREAD a",
                "THREAD a",
                "END",
                "LABEL a",
                "WRITE n 1",
                "END",
            ])
            .unwrap();
        let result = vm.run(program).unwrap().join();

        assert!(result.main.is_halted());
        let ids: Vec<_> = result.threads.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ThreadId(1), ThreadId(2)]);
        assert_eq!(
            result.main.stack,
            vec![Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn test_stop_interrupts_pause_loop() {
        let (vm, log) = vm_with(VMCreateInfo {
            pause_quantum: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let program = vm
            .compile(&["LABEL spin", "PAUSE", "JUMP spin"])
            .unwrap();
        let handle = vm.run(program).unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.stop();
        let result = handle.join();

        assert_eq!(result.main.state, EngineState::Halted);
        assert_eq!(log.for_thread(ThreadId::MAIN), vec![Event::Halted]);
    }

    #[test]
    fn test_stop_reaches_spawned_threads() {
        let (vm, _log) = vm_with(VMCreateInfo {
            pause_quantum: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let program = vm
            .compile(&[
                "THREAD spin",
                "LABEL spin",
                "PAUSE",
                "JUMP spin",
            ])
            .unwrap();
        let handle = vm.run(program).unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.stop();
        let result = handle.join();

        assert!(result.main.is_halted());
        assert_eq!(result.threads.len(), 1);
        assert!(result.threads[0].1.is_halted());
    }

    #[test]
    fn test_step_budget_applies_per_engine() {
        let (vm, _log) = vm_with(VMCreateInfo {
            max_steps: Some(50),
            ..Default::default()
        });
        let program = vm.compile(&["LABEL spin", "JUMP spin"]).unwrap();
        let result = vm.execute(program);
        assert_eq!(
            fault_kind(&result.main),
            Some(&FaultKind::StepLimitExceeded(50))
        );
    }

    #[test]
    fn test_duplicate_declaration_is_rejected() {
        let (vm, _log) = vm_with(VMCreateInfo::default());
        let err = vm
            .compile_source("LABEL top\nEND\n\nLABEL top\n")
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::DuplicateSymbol { line: 4, first: 1, .. }
        ));
    }

    #[test]
    fn test_same_seed_same_ping_behaviour() {
        let lines: Vec<String> = std::iter::repeat_n("PING".to_string(), 200)
            .chain(std::iter::once("END".to_string()))
            .collect();
        let info = VMCreateInfo {
            ping_probability: Some(0.3),
            ping_retries: Some(10),
            ping_backoff: Some(Duration::ZERO),
            seed: Some(1234),
            ..Default::default()
        };

        let run = || {
            let log = Arc::new(EventLog::new());
            let vm = VM::new(info.clone()).with_sink(log.clone());
            let result = vm.execute(vm.compile(&lines).unwrap());
            (result.main.steps, log.snapshot())
        };
        let (steps, events) = run();
        assert!(steps > 201);
        assert_eq!(run(), (steps, events));
    }
}
