use ux_config::UxConfig;

pub fn run(config: &UxConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Print as YAML for readability
    let yaml = config.effective().to_yaml()?;
    println!("{}", yaml);

    Ok(())
}
