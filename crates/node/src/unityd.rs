fn main() {
    if let Err(err) = unityd::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
