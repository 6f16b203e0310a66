fn main() {
    xpander_cli::run_main();
}
