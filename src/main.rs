fn main() -> anyhow::Result<()> {
    prep_inventory::cli::run()
}
