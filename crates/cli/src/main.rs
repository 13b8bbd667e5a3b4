use std::process::ExitCode;

fn main() -> ExitCode {
    almox_cli::run()
}
