fn main() -> anyhow::Result<()> {
    fnrunner::cli::run_cli()
}
