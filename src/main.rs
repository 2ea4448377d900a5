//! Companion binary: run the bank simulation over script files.
//!
//! Usage: `bank_simulator_core_rs <vip_workers> <script>...`
//!
//! Each script file feeds one agent, one command per line. The transaction
//! journal goes to `log.txt` in the working directory; operational
//! diagnostics go to stderr through `tracing` (filter with `RUST_LOG`).

use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process;

use tracing_subscriber::EnvFilter;

use bank_simulator_core_rs::{Journal, Orchestrator, OrchestratorConfig};

const JOURNAL_PATH: &str = "log.txt";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <vip_workers> <script>...", args[0]);
        process::exit(1);
    }

    let vip_workers: usize = match args[1].parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("invalid VIP worker count {:?}", args[1]);
            process::exit(1);
        }
    };

    // Verify every script opens before any thread starts.
    let mut feeds = Vec::new();
    for path in &args[2..] {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("cannot open script {path}: {e}");
                process::exit(1);
            }
        };
        let lines = BufReader::new(file)
            .lines()
            .map_while(Result::ok);
        feeds.push(lines);
    }

    let journal = match Journal::to_file(JOURNAL_PATH) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("cannot open journal {JOURNAL_PATH}: {e}");
            process::exit(1);
        }
    };

    let orchestrator = Orchestrator::new(OrchestratorConfig { vip_workers }, journal);
    if let Err(e) = orchestrator.run(feeds) {
        eprintln!("simulation failed: {e}");
        process::exit(1);
    }
}
