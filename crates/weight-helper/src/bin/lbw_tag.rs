//! `lbw-tag`: decode a weight tag and print its normalized form.
//!
//! Usage:
//!   lbw-tag [--options FILE] [--steps N] [--presets FILE] TAG
//!
//! Set `RUST_LOG=debug` to see decode diagnostics on stderr.

use tracing_subscriber::EnvFilter;
use weight_helper::cli::run;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(std::env::args().skip(1)) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
