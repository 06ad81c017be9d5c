//! Prints the content of a counters file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mcounters::Reader;

#[derive(Parser, Debug)]
#[command(name = "mcprinter")]
#[command(about = "Prints header, statics and live counters of a counters file")]
struct Cli {
    /// Path to the counters file to be parsed
    #[arg(short, long)]
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mcprinter: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> mcounters::Result<()> {
    println!("file: {}", cli.file.display());

    let reader = Reader::open(&cli.file)?;

    println!("version: {}", reader.version());
    println!("pid: {}", reader.pid());
    println!("started: {}", reader.start_time());

    reader.for_each_static(|label, value| {
        println!("static: {}={}", label, value);
        true
    });

    reader.for_each_counter(|id, value, label| {
        println!("counter: {}[{}]={}", label, id, value);
        true
    });

    reader.close()
}
