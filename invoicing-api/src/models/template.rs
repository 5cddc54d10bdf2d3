//! Invoice template model for invoicing-api.

use super::invoice::NewLineItem;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Reusable invoice preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceTemplate {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub items: Vec<TemplateItem>,
    pub tax_rate: Decimal,
    pub currency: String,
    pub terms: Option<String>,
    pub notes: Option<String>,
    pub is_default: bool,
    pub usage_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Line preset carried by a template.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TemplateItem {
    pub id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl From<&TemplateItem> for NewLineItem {
    fn from(item: &TemplateItem) -> Self {
        NewLineItem {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: None,
        }
    }
}

/// Input for creating a template.
#[derive(Debug, Clone)]
pub struct CreateTemplate {
    pub name: String,
    pub description: Option<String>,
    pub items: Vec<NewTemplateItem>,
    pub tax_rate: Decimal,
    pub currency: String,
    pub terms: Option<String>,
    pub notes: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct NewTemplateItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}
