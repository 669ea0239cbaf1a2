fn main() {
    if let Err(err) = barcube_lib::run() {
        eprintln!("barcube: {err:#}");
        std::process::exit(1);
    }
}
