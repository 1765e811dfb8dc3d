use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::{
    daemon::storage::{
        entities::{DestinationConfig, MAX_RECIPIENTS},
        usage_store::{open_store, UsageStore},
    },
    tracking::SiteMatcher,
};

#[derive(clap::Args, Debug, Default)]
pub struct ConfigureCommand {
    #[arg(
        long = "to",
        help = "Recipient address. Repeat for up to 3 recipients. Replaces the existing list"
    )]
    to: Vec<String>,
    #[arg(long = "service-id")]
    service_id: Option<String>,
    #[arg(long = "template-id")]
    template_id: Option<String>,
    #[arg(long = "public-key")]
    public_key: Option<String>,
    #[arg(long, help = "Name shown in report subjects")]
    owner: Option<String>,
}

/// Overlays the given options on top of the existing configuration. Fields that weren't passed
/// keep their stored values.
fn merge(existing: Option<DestinationConfig>, command: ConfigureCommand) -> Result<DestinationConfig> {
    if command.to.len() > MAX_RECIPIENTS {
        return Err(anyhow!("At most {MAX_RECIPIENTS} recipients are supported"));
    }

    let mut config = existing.unwrap_or_default();
    if !command.to.is_empty() {
        config.recipients = command.to;
    }
    if command.service_id.is_some() {
        config.service_id = command.service_id;
    }
    if command.template_id.is_some() {
        config.template_id = command.template_id;
    }
    if command.public_key.is_some() {
        config.public_key = command.public_key;
    }
    if command.owner.is_some() {
        config.report_owner = command.owner;
    }

    let missing = config.missing_fields();
    if !missing.is_empty() {
        return Err(anyhow!("Missing {}", missing.join(", ")));
    }
    Ok(config)
}

pub async fn process_configure_command(app_dir: &Path, command: ConfigureCommand) -> Result<()> {
    let store = open_store(app_dir, SiteMatcher::default().site_names())?;
    let config = merge(store.email_config().await?, command)?;
    info!("Saving email configuration for {}", config.to_field());
    store.set_email_config(config).await?;
    println!("Configuration saved");
    Ok(())
}
