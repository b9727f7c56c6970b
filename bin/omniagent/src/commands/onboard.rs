use omniagent_core::{Paths, Settings};

pub fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;

    let config_path = paths.config_file();
    if config_path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    Settings::default().save(&config_path)?;
    println!("Wrote default config to {}", config_path.display());
    println!("Add an API key under provider.apiKeys before running.");
    Ok(())
}
