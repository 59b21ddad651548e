//! gxlink - read GX devices from the command line
//!
//! Lists the register catalog and reads device categories over Modbus TCP
//! or MQTT through the voltage-gxlink library.

mod config;
mod output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use config::{GxLinkConfig, Overrides, TransportKind};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use voltage_gxlink::{
    read_device_registers, DataType, ModbusClient, MqttClient, RegisterCatalog,
    RegisterDefinition,
};

#[derive(Parser)]
#[command(name = "gxlink")]
#[command(about = "Read GX energy-management devices over Modbus TCP or MQTT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./gxlink.yaml when present)
    #[arg(short, long, global = true, env = "GXLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Transport used by `read`
    #[arg(short, long, global = true, value_enum)]
    transport: Option<TransportKind>,

    /// GX device host or IP address
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// Port of the active transport
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Modbus unit ID (default: the category's unit ID)
    #[arg(short, long, global = true)]
    unit_id: Option<u8>,

    /// MQTT portal ID (discovered when omitted)
    #[arg(long, global = true)]
    portal_id: Option<String>,

    /// MQTT device instance (any instance when omitted)
    #[arg(short, long, global = true)]
    instance: Option<String>,

    /// Register catalog JSON file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List device categories, or the registers of one category
    List {
        /// Service name or search term (e.g. "battery")
        category: Option<String>,
    },

    /// Read every register of a category
    Read {
        /// Service name or search term (e.g. "battery")
        category: String,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read an arbitrary register span over Modbus
    Raw {
        /// Starting register address
        #[arg(short, long)]
        address: u16,

        /// Number of words to read
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,

        /// uint16, int16, uint32, int32, uint64 or string
        #[arg(short, long, default_value = "uint16")]
        data_type: String,

        /// Divisor applied to the decoded value
        #[arg(short, long, default_value_t = 1.0)]
        scale: f64,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover services published on the MQTT broker
    Services {
        /// Print services as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover the portal ID of the GX device behind the MQTT broker
    PortalId,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            portal_id: self.portal_id.clone(),
            device_instance: self.instance.clone(),
            catalog: self.catalog.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_catalog(config: &GxLinkConfig) -> Result<RegisterCatalog> {
    RegisterCatalog::from_path(&config.catalog)
        .with_context(|| format!("Cannot load register catalog {}", config.catalog.display()))
}

/// Configured portal ID, or the one the broker reports
async fn resolve_portal_id(config: &mut GxLinkConfig) -> Result<String> {
    if let Some(portal_id) = config.mqtt.portal_id.clone().filter(|p| !p.trim().is_empty()) {
        return Ok(portal_id);
    }

    let host = config.require_host()?.to_string();
    info!("Discovering portal ID on {}:{}", host, config.mqtt.port);
    let portal_id = MqttClient::discover_portal_id(&host, config.mqtt.port)
        .await
        .context("Portal ID discovery failed")?;
    config.mqtt.portal_id = Some(portal_id.clone());
    Ok(portal_id)
}

fn cmd_list(config: &GxLinkConfig, category: Option<&str>) -> Result<()> {
    let catalog = load_catalog(config)?;
    match category {
        None => output::print_categories(catalog.categories()),
        Some(term) => {
            let found = catalog
                .resolve(term)
                .ok_or_else(|| anyhow!("No category matches '{term}'"))?;
            output::print_registers(found);
        },
    }
    Ok(())
}

async fn cmd_read(config: &mut GxLinkConfig, category: &str, json: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let category = catalog
        .resolve(category)
        .ok_or_else(|| anyhow!("No category matches '{category}'"))?;

    if config.transport == TransportKind::Mqtt {
        resolve_portal_id(config).await?;
    }
    let params = config.connection_params(category.default_unit_id)?;
    debug!("Connection: {:?}", params);

    let results = read_device_registers(&params, &category.service, &category.registers)
        .await
        .with_context(|| format!("Reading {} failed", category.service))?;

    if json {
        output::print_json(&results)
    } else {
        let title = format!(
            "{} via {} {}:{}",
            category.service,
            params.transport_name(),
            params.host(),
            params.port()
        );
        output::print_results(&title, &results);
        Ok(())
    }
}

async fn cmd_raw(config: &GxLinkConfig, def: RegisterDefinition, json: bool) -> Result<()> {
    let host = config.require_host()?;
    let unit_id = config
        .modbus
        .unit_id
        .ok_or_else(|| anyhow!("--unit-id is required for raw reads"))?;

    let mut client = ModbusClient::new();
    client.connect(host, config.modbus.port).await?;
    client.set_unit_id(unit_id);
    let outcome = client.read_register(&def).await;
    client.close().await;
    let result = outcome?;

    if json {
        return output::print_json(&result);
    }
    println!("{}", "Raw register read".bold());
    println!("  Address:       {}", def.address);
    println!("  Unit ID:       {}", unit_id);
    println!("  Data type:     {}", def.data_type);
    println!("  Scale factor:  {}", def.scale_factor);
    println!("  Raw value:     {}", result.raw_value);
    println!("  Decoded value: {}", result.value.to_string().green());
    Ok(())
}

async fn cmd_services(config: &mut GxLinkConfig, json: bool) -> Result<()> {
    let portal_id = resolve_portal_id(config).await?;
    let host = config.require_host()?.to_string();

    let mut client = MqttClient::connect(&host, config.mqtt.port, portal_id.as_str()).await?;
    let outcome = client.discover_services().await;
    client.close().await;
    let services = outcome?;

    if json {
        output::print_json(&services)
    } else {
        output::print_services(&portal_id, &services);
        Ok(())
    }
}

async fn cmd_portal_id(config: &GxLinkConfig) -> Result<()> {
    let host = config.require_host()?;
    let portal_id = MqttClient::discover_portal_id(host, config.mqtt.port).await?;
    println!("{}", portal_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config = GxLinkConfig::load(cli.config.as_deref())?;
    config.apply(cli.overrides());
    init_logging(&config.log_level);

    match cli.command {
        Commands::List { category } => cmd_list(&config, category.as_deref()),
        Commands::Read { category, json } => cmd_read(&mut config, &category, json).await,
        Commands::Raw {
            address,
            count,
            data_type,
            scale,
            json,
        } => {
            let data_type: DataType = data_type.parse()?;
            let def = RegisterDefinition::ad_hoc(address, count, data_type, scale);
            cmd_raw(&config, def, json).await
        },
        Commands::Services { json } => cmd_services(&mut config, json).await,
        Commands::PortalId => cmd_portal_id(&config).await,
    }
}
