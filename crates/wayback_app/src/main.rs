//! `wayback-mirror`: downloads the archived history of a website.
mod cli;
mod platform;

fn main() -> std::process::ExitCode {
    platform::run_app()
}
