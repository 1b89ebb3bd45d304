use clap::Subcommand;
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "Provision a database for a new tenant and register it")]
    Create {
        #[arg(help = "Tenant name")]
        name: String,
    },

    #[command(about = "List all tenants in the catalog")]
    List,

    #[command(about = "Show tenant information")]
    Show {
        #[arg(help = "Tenant name")]
        name: String,
    },
}

pub async fn handle(cmd: TenantCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TenantCommands::Create { name } => {
            let record = state.tenants.create_tenant(&name).await?;

            output_success(
                &output_format,
                &format!("Tenant '{}' created in database {}", record.name, record.database_name),
                Some(json!({ "tenant": tenant_json(&record) })),
            )
        }
        TenantCommands::List => {
            let tenants = state.tenants.list().await?;

            if tenants.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenants provisioned");
            }

            match output_format {
                OutputFormat::Json => {
                    let tenants: Vec<_> = tenants.iter().map(tenant_json).collect();
                    println!("{}", serde_json::to_string_pretty(&json!({ "tenants": tenants }))?);
                }
                OutputFormat::Text => {
                    println!("{:<6} {:<25} {:<35} {}", "ID", "NAME", "DATABASE", "CREATED");
                    println!("{}", "-".repeat(90));

                    for tenant in &tenants {
                        let created = tenant.created_at.format("%Y-%m-%d %H:%M").to_string();
                        println!(
                            "{:<6} {:<25} {:<35} {}",
                            tenant.id, tenant.name, tenant.database_name, created
                        );
                    }
                }
            }

            Ok(())
        }
        TenantCommands::Show { name } => {
            let details = tenant_details(state, &name).await?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "tenant": details }))?);
                }
                OutputFormat::Text => {
                    println!("Tenant: {}", details["name"].as_str().unwrap_or_default());
                    println!("ID: {}", details["id"]);
                    println!("Database: {}", details["database_name"].as_str().unwrap_or_default());
                    println!("Database user: {}", details["database_user"].as_str().unwrap_or_default());
                    println!("Created: {}", details["created_at"].as_str().unwrap_or_default());
                    println!("Updated: {}", details["updated_at"].as_str().unwrap_or_default());
                    let reachable = details["reachable"].as_bool().unwrap_or(false);
                    println!("Reachable: {}", if reachable { "yes" } else { "no" });
                }
            }

            Ok(())
        }
    }
}

/// Catalog row plus a live connection attempt with the tenant's own
/// credentials.
pub async fn tenant_details(state: &AppState, name: &str) -> anyhow::Result<Value> {
    let record = state.tenants.find(name).await?;
    let reachable = match state.registry.get_or_create(&record.name).await {
        Ok(_) => true,
        Err(e) => {
            debug!("Tenant '{}' is not reachable: {}", record.name, e);
            false
        }
    };

    let mut details = tenant_json(&record);
    details["reachable"] = json!(reachable);
    Ok(details)
}
