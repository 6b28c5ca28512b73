use kiln_core::PortConfig;

/// Validate a port declaration and print the resolved form.
///
/// Warnings are logged by the normalizer itself.
pub fn port(config: PortConfig) -> anyhow::Result<()> {
    let normalized = config.normalize()?;
    let port = normalized.port;
    println!("{}/{} mode={}", port.target, port.protocol, port.mode);
    Ok(())
}
