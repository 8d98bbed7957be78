fn main() {
    if let Err(err) = shelly_auto_off::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
