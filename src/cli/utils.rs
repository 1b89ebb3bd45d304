use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::database::models::TenantRecord;
use crate::services::MigrationReport;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(output_format: &OutputFormat, collection_name: &str, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    collection_name: []
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Tenant row as shown to operators. The database password never leaves
/// the catalog.
pub fn tenant_json(record: &TenantRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "database_name": record.database_name,
        "database_user": record.database_user,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

pub fn report_json(report: &MigrationReport) -> Value {
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|(tenant, error)| json!({ "tenant": tenant, "error": error }))
        .collect();
    json!({
        "succeeded": report.succeeded,
        "failed": failed,
    })
}

/// Prints a bulk migration report and fails when any tenant failed, so the
/// process exits non-zero.
pub fn output_report(output_format: &OutputFormat, action: &str, report: &MigrationReport) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut body = report_json(report);
            body["success"] = json!(report.is_clean());
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            for tenant in &report.succeeded {
                println!("✓ {} {}", action, tenant);
            }
            for (tenant, error) in &report.failed {
                eprintln!("✗ {} {}: {}", action, tenant, error);
            }
            println!(
                "{} succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            );
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} of {} tenants failed",
            report.failed.len(),
            report.succeeded.len() + report.failed.len()
        ))
    }
}
