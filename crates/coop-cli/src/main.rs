// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coop CLI - demo workloads on the cooperative scheduler.

mod logger;
mod output;
mod workloads;

use std::env;
use std::process;
use std::time::Duration;

use coop_rt::{Resource, Scheduler, SchedulerConfig};

use workloads::{LineReader, PipeWriter, Printer};

fn main() {
    output::init();

    let mut verbosity = 0;
    let args: Vec<String> = env::args()
        .filter(|a| match a.as_str() {
            "-v" => {
                verbosity += 1;
                false
            }
            "-vv" => {
                verbosity += 2;
                false
            }
            _ => true,
        })
        .collect();
    logger::init(verbosity);

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "ticker" => {
            let seconds = parse_arg(args.get(2), "seconds", 6);
            cmd_ticker(seconds);
        }
        "pipe" => {
            let lines = parse_arg(args.get(2), "lines", 5);
            cmd_pipe(lines as usize);
        }
        "echo" => cmd_echo(),
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("coop {}", env!("CARGO_PKG_VERSION"));
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        "{} {} - cooperative scheduler demos",
        output::title("coop"),
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "{} coop [-v|-vv] <command> [args]",
        output::section_header("Usage:")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!(
        "  {} {}  Print A every 5s and B every 1s",
        output::command("ticker"),
        output::arg("[seconds]")
    );
    println!(
        "  {} {}      Writer and reader coroutines share a pipe",
        output::command("pipe"),
        output::arg("[lines]")
    );
    println!(
        "  {}               Echo stdin lines as they arrive",
        output::command("echo")
    );
    println!("  {}               Show this help", output::command("help"));
    println!("  {}            Show version", output::command("version"));
    println!();
    println!("Log level: -v (debug), -vv (trace), or COOP_LOG=<level>");
}

fn parse_arg(arg: Option<&String>, name: &str, default: u64) -> u64 {
    match arg {
        None => default,
        Some(s) => match s.parse() {
            Ok(n) => n,
            Err(_) => fail(&format!("{} must be a whole number, got `{}`", name, s)),
        },
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{}: {}", output::error_label(), message);
    process::exit(1);
}

fn scheduler(config: SchedulerConfig) -> Scheduler {
    let mut sched = match Scheduler::with_config(config) {
        Ok(s) => s,
        Err(e) => fail(&e.to_string()),
    };
    sched.on_fault(|report| {
        eprintln!(
            "{}: task {}: {}",
            output::fault_label(),
            report.task,
            report.fault
        );
    });
    sched
}

fn cmd_ticker(seconds: u64) {
    let mut sched = scheduler(SchedulerConfig::default());
    for (label, every) in [("A", 5), ("B", 1)] {
        let printer = Printer {
            label: label.to_string(),
            every: Duration::from_secs(every),
        };
        if let Err(e) = sched.spawn(printer) {
            fail(&e.to_string());
        }
    }
    if let Err(e) = sched.run_for(Duration::from_secs(seconds)) {
        fail(&e.to_string());
    }
}

fn cmd_pipe(lines: usize) {
    let (read_end, write_end) = match workloads::pipe() {
        Ok(p) => p,
        Err(e) => fail(&format!("cannot create pipe: {}", e)),
    };

    let mut sched = scheduler(SchedulerConfig::default());
    let spawned = sched
        .spawn(LineReader::new(read_end, "read: ", true))
        .and_then(|_| {
            sched.spawn(PipeWriter::new(
                write_end,
                lines,
                Duration::from_millis(250),
            ))
        });
    if let Err(e) = spawned {
        fail(&e.to_string());
    }
    if let Err(e) = sched.run() {
        fail(&e.to_string());
    }
}

fn cmd_echo() {
    let stdin = Resource::from_raw(libc::STDIN_FILENO);
    if let Err(e) = workloads::set_nonblocking(stdin) {
        fail(&format!("cannot make stdin non-blocking: {}", e));
    }

    let mut sched = scheduler(SchedulerConfig::default());
    if let Err(e) = sched.spawn(LineReader::new(stdin, "echo: ", false)) {
        // Regular files cannot be polled; echo only works on ttys and pipes.
        fail(&format!("cannot watch stdin: {}", e));
    }
    if let Err(e) = sched.run() {
        fail(&e.to_string());
    }
}
