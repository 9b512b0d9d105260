//! `viua-rt`: load a module binary and run it to completion.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use viua_rt::prelude::*;

fn print_usage() {
    eprintln!("usage: viua-rt [-v|--verbose] [-i|--info] <module>");
}

fn print_help() {
    println!("viua-rt {}", env!("CARGO_PKG_VERSION"));
    println!();
    print_usage();
    println!();
    println!("  -h, --help       print this message and exit");
    println!("  -V, --version    print the version and exit");
    println!("  -v, --verbose    emit debug-level tracing to stderr");
    println!("  -i, --info       print the module's metadata and exit without running it");
}

fn print_module_info(module: &Module) {
    println!("kind: {:?}", module.kind());
    println!("entry point: {:?}", module.entry_offset());
    println!("metadata:");
    for (key, value) in module.metadata() {
        println!("  {key} = {value}");
    }
    println!("external functions: {}", module.external_functions().len());
    println!("external blocks: {}", module.external_blocks().len());
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let mut verbose = false;
    let mut info = false;
    let mut module_path: Option<String> = None;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "-V" | "--version" => {
                println!("viua-rt {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "-v" | "--verbose" => verbose = true,
            "-i" | "--info" => info = true,
            other if module_path.is_none() => module_path = Some(other.to_owned()),
            other => {
                eprintln!("viua-rt: unexpected argument '{other}'");
                print_usage();
                return ExitCode::FAILURE;
            }
        }
    }

    init_tracing(verbose);

    let Some(path) = module_path else {
        eprintln!("viua-rt: missing module path");
        print_usage();
        return ExitCode::FAILURE;
    };

    let module = match Module::load(&path) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("viua-rt: failed to load module '{path}': {err}");
            return ExitCode::FAILURE;
        }
    };

    if info {
        print_module_info(&module);
        return ExitCode::SUCCESS;
    }

    let config = RuntimeConfig::from_env();
    let (kernel, process) = match Kernel::bootstrap(config, Arc::new(module)) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("viua-rt: {err}");
            return ExitCode::FAILURE;
        }
    };

    let exit_code = ProcessPool::run(kernel, process);
    if exit_code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
