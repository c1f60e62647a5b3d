//! `config` subcommand: show current configuration and file path.

use std::path::Path;

use super::{
    Config, ConfigOutput, Result, TowerLightError, config_file, kv, kv_indent, kv_width,
    print_json,
};

/// Write the default configuration to the config file. Never overwrites.
fn init_config(custom_path: Option<&Path>) -> Result<()> {
    let path = config_file(custom_path)?;
    if path.exists() {
        return Err(TowerLightError::Config(format!(
            "{} already exists, not overwriting",
            path.display()
        )));
    }
    Config::default().save_to(&path)?;
    log::info!("[config] wrote defaults to {}", path.display());
    Ok(())
}

pub(super) fn cmd_config(json: bool, init: bool, custom_path: Option<&Path>) -> Result<()> {
    if init {
        init_config(custom_path)?;
    }
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
        });
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:"],
        &[
            "enabled:",
            "strobe:",
            "delay_on_ms:",
            "delay_off_ms:",
            "blink_states:",
            "forward_events:",
            "badge:",
            "max_strobe_failures:",
            "stop_timeout_ms:",
            "backend:",
            "sysfs_root:",
        ],
    );

    match &config_path {
        Some(p) => {
            if config_exists {
                kv("Config file:", format_args!("{} (loaded)", p.display()), w);
            } else {
                kv(
                    "Config file:",
                    format_args!("{} (not found, using defaults)", p.display()),
                    w,
                );
            }
        }
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    kv_indent("enabled:", config.enabled, w);
    kv_indent("strobe:", config.strobe, w);
    kv_indent("delay_on_ms:", config.delay_on_ms, w);
    kv_indent("delay_off_ms:", config.delay_off_ms, w);
    kv_indent("blink_states:", config.blink_states.join(", "), w);
    kv_indent("forward_events:", config.forward_events, w);
    kv_indent("badge:", format_args!("{:?}", config.badge), w);
    kv_indent("max_strobe_failures:", config.max_strobe_failures, w);
    kv_indent("stop_timeout_ms:", config.stop_timeout_ms, w);
    println!();

    println!("Pins:");
    for (name, pin) in config.pins.named() {
        kv_indent(&format!("{name}:"), pin, w);
    }
    println!();

    println!("GPIO:");
    kv_indent("backend:", config.gpio.backend, w);
    kv_indent("sysfs_root:", &config.gpio.sysfs_root, w);

    if let Err(errors) = config.validate() {
        println!();
        println!("Problems:");
        for e in &errors {
            println!("  {e}");
        }
    }
    Ok(())
}
