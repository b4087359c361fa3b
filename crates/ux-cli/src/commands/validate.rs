use std::path::Path;

use ux_config::UxConfig;

pub fn run(config: &UxConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let errors = config.validate();
    if errors.is_empty() {
        println!("{}: configuration is valid", path.display());
        return Ok(());
    }

    eprintln!("{}: {} problem(s)", path.display(), errors.len());
    for error in &errors {
        eprintln!("  - {}", error);
    }
    Err(format!("Invalid configuration: {}", path.display()).into())
}
