fn main() {
    if let Err(err) = shelly_auto_off::app::run_simulation() {
        eprintln!("simulation startup failed: {err}");
        std::process::exit(1);
    }
}
