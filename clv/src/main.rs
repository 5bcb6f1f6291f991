use clap::Parser as ClapParser;
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process,
    sync::Arc,
    time::Duration,
};

use clv::{
    Event, EventSink, Isolation, LogSink, Program, RunResult, ThreadId, VM,
    VMCreateInfo,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source files, compiled and run in order
    #[arg(required = true, help = "The .clv files to execute")]
    files: Vec<PathBuf>,

    /// Print the compiled program instead of running it
    #[arg(long, help = "Dump the disassembled bytecode for the inputs")]
    dump_bytecode: bool,

    #[arg(long, help = "Evaluation stack capacity")]
    stack_size: Option<usize>,

    #[arg(long, help = "Call stack depth limit")]
    return_stack_size: Option<usize>,

    #[arg(long, help = "Memory manager page size in slots")]
    page_size: Option<usize>,

    #[arg(long, help = "Probability that a PING signals a transient fault")]
    ping_probability: Option<f64>,

    #[arg(long, help = "PING retries before the fault becomes fatal")]
    ping_retries: Option<u32>,

    #[arg(long, help = "PAUSE duration in milliseconds")]
    pause_ms: Option<u64>,

    #[arg(long, help = "Seed for PING fault injection")]
    seed: Option<u64>,

    /// Share registers and memory with spawned threads instead of copying
    #[arg(long, help = "Spawned threads share registers and memory")]
    shared_threads: bool,

    #[arg(long, help = "Fault an engine after this many instructions")]
    max_steps: Option<u64>,
}

impl Cli {
    fn create_info(&self) -> VMCreateInfo {
        VMCreateInfo {
            stack_size: self.stack_size,
            return_stack_size: self.return_stack_size,
            page_size: self.page_size,
            ping_probability: self.ping_probability,
            ping_retries: self.ping_retries,
            ping_backoff: None,
            pause_quantum: self.pause_ms.map(Duration::from_millis),
            isolation: self.shared_threads.then_some(Isolation::Shared),
            seed: self.seed,
            max_steps: self.max_steps,
        }
    }
}

/// Prints values to stdout, everything else goes to the logger.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, origin: ThreadId, event: Event) {
        match event {
            Event::Printed(value) => {
                let mut stdout = io::stdout().lock();
                let written = if origin == ThreadId::MAIN {
                    writeln!(stdout, "{value}")
                } else {
                    writeln!(stdout, "[{origin}] {value}")
                };
                if let Err(err) = written {
                    log::error!("failed to write to stdout: {err}");
                }
            }
            other => LogSink.emit(origin, other),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .init();

    let cli = Cli::parse();
    let vm = VM::new(cli.create_info()).with_sink(Arc::new(ConsoleSink));

    let mut failed = false;
    for filename in &cli.files {
        let source_code = match fs::read_to_string(filename) {
            Ok(content) => content,
            Err(err) => {
                eprintln!("Error reading file '{}': {}", filename.display(), err);
                process::exit(1);
            }
        };

        let program = match vm.compile_source(&source_code) {
            Ok(program) => program,
            Err(err) => {
                eprintln!("Error compiling {}: {}", filename.display(), err);
                process::exit(1);
            }
        };

        if cli.dump_bytecode {
            println!("== {} ==", filename.display());
            dump_program(&program);
            continue;
        }

        let result = vm.execute(program.clone());
        if !report_faults(&filename.display().to_string(), &program, &result) {
            failed = true;
        }
    }

    if failed {
        process::exit(1);
    }
}

fn dump_program(program: &Program) {
    print!("{}", program.disassemble());
}

/// Returns `false` if any engine faulted.
fn report_faults(filename: &str, program: &Program, result: &RunResult) -> bool {
    let mut clean = true;
    for (thread, fault) in result.faults() {
        match program.line_of(fault.pc) {
            Some(line) => {
                eprintln!("Error executing {filename}:{line} ({thread}): {fault}")
            }
            None => eprintln!("Error executing {filename} ({thread}): {fault}"),
        }
        clean = false;
    }
    clean
}
