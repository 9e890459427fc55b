use cinder::bytecode::disasm::print_bytecode;
use cinder::{Bytecode, Vm, VmConfig};
use std::{env, fs, path::Path, process, rc::Rc};
use tracing::debug;

fn main() {
    cinder::init_logging();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let disasm = args.iter().any(|a| a == "--disasm" || a == "-d");
    let show_globals = args.iter().any(|a| a == "--globals");
    let max_steps = match flag_value(&args, "--max-steps") {
        Some(v) => match v.parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                eprintln!("Error: --max-steps expects a number, got '{}'", v);
                process::exit(2);
            }
        },
        None => None,
    };

    // first non-flag argument that is not a flag value is the filename
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && args[i - 1] != "--max-steps")
        .map(|(_, a)| a.as_str());

    let Some(filename) = filename else {
        print_usage();
        process::exit(2);
    };

    let bytecode = match load(Path::new(filename)) {
        Ok(bc) => bc,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    };

    if disasm {
        print_bytecode(&bytecode);
        return;
    }

    let config = VmConfig {
        max_steps,
        ..VmConfig::default()
    };
    let mut vm = Vm::with_config(Rc::new(bytecode), Vec::new(), config);
    if let Err(e) = vm.run() {
        eprintln!("{}", e);
        process::exit(1);
    }
    debug!(steps = vm.steps(), "run finished");

    if show_globals {
        for (idx, value) in vm.globals().iter().enumerate() {
            println!("[{}] {}", idx, value);
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).map(String::as_str)
}

fn load(path: &Path) -> Result<Bytecode, String> {
    let bytes =
        fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Bytecode::decode(&bytes).map_err(|e| format!("Invalid bytecode in '{}': {}", path.display(), e))
}

fn print_usage() {
    println!("CINDER - embeddable scripting engine");
    println!();
    println!("Usage:");
    println!("  cinder <file>                 Run a compiled bytecode file");
    println!("  cinder --disasm <file>        Disassemble instead of running");
    println!("  cinder --globals <file>       Print global slots after the run");
    println!("  cinder --max-steps N <file>   Abort after N instructions");
    println!("  cinder --help, -h             Show this help");
    println!();
    println!("Set RUST_LOG=debug (or trace) for engine logs.");
}
