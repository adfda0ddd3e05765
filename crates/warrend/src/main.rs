//! Entry point for the warren service.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match warrend::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "warrend: {error}"));
            ExitCode::FAILURE
        }
    }
}
