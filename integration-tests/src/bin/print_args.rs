//! Demo target: report how it was started
//!
//! Usage: print-args [args...]
//! Outputs:
//!   ARGS:<arg0>|<arg1>|...
//!   ARGC:<n>
//!   PID:<pid>
//!   ENV:DYNEXE_TEST_MARKER=<value>
//!   MAPPED:<path> (once per file mapped into this process)
//!
//! The MAPPED lines show which interpreter and libraries the loader actually
//! picked, so the test runner can tell the bundled ones from the host's.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::process::{self, ExitCode};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    println!("ARGS:{}", args.join("|"));
    println!("ARGC:{}", args.len());
    println!("PID:{}", process::id());

    match env::var("DYNEXE_TEST_MARKER") {
        Ok(value) => println!("ENV:DYNEXE_TEST_MARKER={}", value),
        Err(_) => println!("ENV:DYNEXE_TEST_MARKER=<unset>"),
    }

    let maps = match fs::read_to_string("/proc/self/maps") {
        Ok(maps) => maps,
        Err(e) => {
            eprintln!("Failed to read /proc/self/maps: {}", e);
            return ExitCode::from(1);
        }
    };

    // address perms offset dev inode path
    let mapped: BTreeSet<&str> = maps
        .lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .filter(|path| path.starts_with('/'))
        .collect();
    for path in mapped {
        println!("MAPPED:{}", path);
    }

    ExitCode::SUCCESS
}
