use std::process::ExitCode;

fn main() -> ExitCode {
    confq_cli::run()
}
