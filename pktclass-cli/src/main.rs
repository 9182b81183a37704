use clap::Parser;
use colored::Colorize;

fn main() {
    let opts = pktclass_cli::Opts::parse();
    if let Err(e) = pktclass_cli::run(&opts) {
        eprintln!("{} {}", "[error]".red(), e);
        std::process::exit(1);
    }
}
