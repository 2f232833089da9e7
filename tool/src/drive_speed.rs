use std::{
    fs::{self, File},
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{ensure, Context};
use util::{DRIVE_RPM_MAX, DRIVE_RPM_MIN, DRIVE_RPM_NOMINAL};

fn config_path() -> anyhow::Result<PathBuf> {
    Ok(home::home_dir()
        .context("Home Directoy not available")?
        .join(".nibtools/")
        .join("rpm.cfg"))
}

/// Motor speed of the last calibration
pub fn read_stored_rpm() -> anyhow::Result<f64> {
    let config_path = config_path()?;

    log::info!("Reading drive speed from {config_path:?}");

    let file = File::open(&config_path).map_err(|f| {
        log::info!("Custom drive speed not found. Use default...");
        f
    })?;

    let mut lines = io::BufReader::new(file).lines();
    let first_line = lines.next().context("No first line?")??;
    let rpm: f64 = first_line.trim().parse()?;
    ensure!(
        (DRIVE_RPM_MIN..=DRIVE_RPM_MAX).contains(&rpm),
        "Stored drive speed {rpm} is out of range"
    );
    log::info!("Using stored drive speed: {rpm:.2} RPM");

    Ok(rpm)
}

#[must_use]
pub fn get_rpm() -> f64 {
    read_stored_rpm().unwrap_or(DRIVE_RPM_NOMINAL)
}

pub fn store_rpm(rpm: f64) -> anyhow::Result<()> {
    let config_path = config_path()?;

    if let Some(dir) = config_path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut file = File::create(&config_path).map_err(|f| {
        log::warn!("Unable to create file: {f}");
        f
    })?;

    file.write_all(format!("{rpm:.2}\n").as_bytes())?;

    log::info!("Drive speed is stored in {config_path:?}");

    Ok(())
}
