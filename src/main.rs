fn main() {
    std::process::exit(warden::run());
}
