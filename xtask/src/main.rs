use std::env;
use std::path::Path;
use std::process::{Command, ExitCode};

const FMT: &str = "cargo fmt --all -- --check";
const LINT: &str = "cargo clippy --workspace --all-targets -- -D warnings";
const TEST: &str = "cargo test --workspace";
const BENCH_BUILD: &str = "cargo bench --workspace --no-run";

fn run(root: &Path, cmd: &str) -> Result<(), String> {
    eprintln!("+ {cmd}");
    let status = Command::new("sh")
        .arg("-lc")
        .arg(cmd)
        .current_dir(root)
        .status()
        .map_err(|e| format!("failed to run `{cmd}`: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("command failed: {cmd}"))
    }
}

fn main() -> ExitCode {
    let arg = env::args().nth(1).unwrap_or_else(|| "help".to_string());
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root");

    let result = match arg.as_str() {
        "fmt" => run(root, FMT),
        "lint" => run(root, LINT),
        "test" => run(root, TEST),
        "ci" => [FMT, LINT, TEST, BENCH_BUILD]
            .iter()
            .try_for_each(|cmd| run(root, cmd)),
        "help" | "--help" | "-h" => {
            eprintln!("xtask commands:");
            eprintln!("  fmt   check formatting");
            eprintln!("  lint  clippy with warnings denied");
            eprintln!("  test  workspace tests");
            eprintln!("  ci    all of the above plus a bench build");
            Ok(())
        }
        _ => Err(format!(
            "unknown xtask command: {arg} (try `cargo run -p xtask -- help`)"
        )),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
