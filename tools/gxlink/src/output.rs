//! Terminal rendering

use colored::*;
use voltage_gxlink::{DiscoveredService, ReadValue, RegisterCategory, RegisterReadResult};

pub fn print_categories(categories: &[RegisterCategory]) {
    println!("{}", "Device categories".bold());
    println!(
        "  {:<40} {:>6} {:>10}  {}",
        "SERVICE".dimmed(),
        "UNIT".dimmed(),
        "REGISTERS".dimmed(),
        "DESCRIPTION".dimmed()
    );
    for category in categories {
        println!(
            "  {:<40} {:>6} {:>10}  {}",
            category.service.cyan(),
            category.default_unit_id,
            category.registers.len(),
            category.description
        );
    }
}

pub fn print_registers(category: &RegisterCategory) {
    println!(
        "{} {} (default unit ID {})",
        category.service.bold(),
        format!("- {}", category.description).dimmed(),
        category.default_unit_id
    );
    println!(
        "  {:>7}  {:<36} {:<8} {:>8} {:<10} {}",
        "ADDR".dimmed(),
        "NAME".dimmed(),
        "TYPE".dimmed(),
        "SCALE".dimmed(),
        "UNIT".dimmed(),
        "PATH".dimmed()
    );
    for reg in &category.registers {
        let access = if reg.writable { " (rw)" } else { "" };
        println!(
            "  {:>7}  {:<36} {:<8} {:>8} {:<10} {}{}",
            reg.address,
            reg.name,
            reg.data_type.as_str(),
            reg.scale_factor,
            reg.unit,
            reg.dbus_path,
            access.yellow()
        );
    }
}

fn render_value(result: &RegisterReadResult) -> ColoredString {
    let mut text = match &result.value {
        ReadValue::Number(n) if result.unit.is_empty() => n.to_string(),
        ReadValue::Number(n) => format!("{n} {}", result.unit),
        ReadValue::Text(s) => s.clone(),
    };
    if let Some(label) = &result.enum_label {
        text = format!("{text} ({label})");
    }

    match &result.value {
        ReadValue::Number(_) => text.green(),
        ReadValue::Text(_) if result.value.is_not_available() => text.dimmed(),
        ReadValue::Text(s) if s == voltage_gxlink::READ_ERROR => text.red(),
        ReadValue::Text(_) => text.normal(),
    }
}

pub fn print_results(title: &str, results: &[RegisterReadResult]) {
    println!("{}", title.bold());
    let width = results.iter().map(|r| r.name.len()).max().unwrap_or(0);
    for result in results {
        println!("  {:<width$}  {}", result.name, render_value(result), width = width);
    }
}

pub fn print_services(portal_id: &str, services: &[DiscoveredService]) {
    println!("{} {}", "Portal".bold(), portal_id.cyan());
    if services.is_empty() {
        println!("  {}", "No services published".dimmed());
        return;
    }
    for service in services {
        println!(
            "  {:<20} instance {}",
            service.service_type,
            service.device_instance.yellow()
        );
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
