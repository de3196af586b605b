//! Demo records and their cache schemas.

use serde::{Deserialize, Serialize};
use tessera_core::{FieldDef, FieldKind, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub zip: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: i64,
    pub org_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub resume: String,
    pub salary: f64,
    pub address: Address,
}

impl Person {
    /// Synthetic person number `i`; salaries spread over 0..10000.
    pub fn synthetic(i: i64, orgs: i64) -> Self {
        let degree = if i % 3 == 0 { "Bachelor" } else { "Master" };
        Self {
            id: i,
            org_id: i % orgs + 1,
            first_name: format!("John{i}"),
            last_name: format!("Doe{i}"),
            resume: format!("John Doe has {degree} Degree. {i}"),
            salary: ((i * 7919) % 10_000) as f64,
            address: Address {
                street: format!("{} Main St", i % 200),
                zip: 10_000 + i % 90,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

pub fn person_schema() -> Schema {
    Schema::record("Person")
        .field(FieldDef::new("orgId", FieldKind::Int).sorted())
        .field(FieldDef::new("firstName", FieldKind::String))
        .field(FieldDef::new("lastName", FieldKind::String).hashed())
        .field(FieldDef::new("resume", FieldKind::String).text())
        .field(FieldDef::new("salary", FieldKind::Float).sorted())
        .field(FieldDef::new("address.zip", FieldKind::Int).sorted())
}

pub fn organization_schema() -> Schema {
    Schema::record("Organization").field(FieldDef::new("name", FieldKind::String).hashed())
}
