fn main() -> anyhow::Result<()> {
    loadgen::cli::execute()
}
