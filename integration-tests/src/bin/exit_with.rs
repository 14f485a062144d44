//! Demo target: exit with the given status
//!
//! Usage: exit-with <code>

use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <code>", args[0]);
        return ExitCode::from(1);
    }

    match args[1].parse::<u8>() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error parsing '{}' as exit code: {}", args[1], e);
            ExitCode::from(1)
        }
    }
}
