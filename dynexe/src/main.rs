use std::process::ExitCode;

fn main() -> ExitCode {
    match dynexe::run() {
        Ok(never) => match never {},
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}
