fn main() {
    if let Err(err) = csv_metrics::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
