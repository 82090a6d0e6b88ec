use std::process::ExitCode;

fn main() -> ExitCode {
    datasage_cli::run()
}
