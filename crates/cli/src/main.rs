use std::process::ExitCode;

fn main() -> ExitCode {
    vendi_cli::run()
}
