/// Display version information
pub fn execute() {
    println!("matrixbot {}", env!("CARGO_PKG_VERSION"));
    println!("End-to-end encrypted Matrix bot");
}
