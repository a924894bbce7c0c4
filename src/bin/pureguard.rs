use anyhow::Result;

fn main() -> Result<()> {
    pureguard::cli::run()
}
