use std::process::ExitCode;

fn main() -> ExitCode {
    koperasi_cli::run()
}
