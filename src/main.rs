fn main() {
    if let Err(err) = market_rollup::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
