use std::process::ExitCode;

fn main() -> ExitCode {
    fixtrack_cli::run()
}
