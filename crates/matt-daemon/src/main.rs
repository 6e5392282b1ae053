use std::process::ExitCode;

#[expect(
    clippy::print_stderr,
    reason = "launch failures are reported to the invoking terminal"
)]
fn main() -> ExitCode {
    match matt_daemon::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
