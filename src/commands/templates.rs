//! Templates command handler.
//!
//! Lists the built-in strategy templates, or instantiates one as a
//! strategy entry ready to paste into a deployment file.

use crate::strategy::templates::{by_category, catalogue, find};
use crate::strategy::TemplateCategory;
use crate::types::AccountId;

/// # Errors
/// Returns error for an unknown template id or a serialization failure.
pub fn run_templates(
    category: Option<TemplateCategory>,
    json: bool,
    instantiate: Option<&str>,
    account: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(id) = instantiate {
        let template = find(id).ok_or_else(|| format!("Unknown template '{}'", id))?;
        let account = account.ok_or("--account is required with --instantiate")?;
        let strategy = template.instantiate(AccountId::new(account));
        println!("{}", serde_json::to_string_pretty(&strategy)?);
        return Ok(());
    }

    let templates = match category {
        Some(category) => by_category(category),
        None => catalogue(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    for template in &templates {
        println!(
            "{:<20} {:<13} {:<16} {:<8} {}",
            template.id,
            template.category.to_string(),
            template.trigger.kind().as_str(),
            template.action.kind().as_str(),
            template.description
        );
    }
    Ok(())
}
