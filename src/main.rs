fn main() {
    if let Err(err) = cnpj_consolidator::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
