use clap::Parser;

fn main() {
    let cli = tweedhatctl::Cli::parse();
    if let Err(err) = tweedhatctl::init_tracing(cli.debug) {
        eprintln!("warning: {err}");
    }
    if let Err(err) = tweedhatctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
