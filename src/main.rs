fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = wdscrape::cli::Args::parse();
    wdscrape::logging::init(args.quiet);
    if let Err(e) = wdscrape::cli::run(&args) {
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
