fn main() {
    use clap::Parser;
    use novelscrape::{cli, logging};
    use std::error::Error;
    let args = cli::Args::parse();
    if let Err(e) = logging::init(logging::default_level(args.quiet, args.verbose)) {
        eprintln!("{:#}", e);
    }
    if let Err(e) = cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
