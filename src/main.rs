fn main() -> anyhow::Result<()> {
    prospectus::run()?;
    Ok(())
}
