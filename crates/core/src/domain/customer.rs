use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A customer record as held by the customer collaborator, or an
/// unsaved snapshot accumulated on a session (`id: None`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub metadata: Map<String, Value>,
}

impl Customer {
    /// An identity is something the customer collaborator can key on.
    pub fn has_identity(&self) -> bool {
        has_value(&self.email) || has_value(&self.phone)
    }

    /// Overlays the supplied partial profile onto this snapshot.
    /// Present fields win; absent fields keep the snapshot's values.
    pub fn merged_with(&self, profile: &CustomerProfile) -> Customer {
        let mut merged = self.clone();
        if let Some(name) = &profile.name {
            merged.name = name.clone();
        }
        if profile.email.is_some() {
            merged.email = profile.email.clone();
        }
        if profile.phone.is_some() {
            merged.phone = profile.phone.clone();
        }
        if profile.address.is_some() {
            merged.address = profile.address.clone();
        }
        merged
    }
}

/// Partial customer data supplied with a turn (checkout override) or
/// passed to `CustomerAdapter::get_or_create`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl CustomerProfile {
    pub fn has_identity(&self) -> bool {
        has_value(&self.email) || has_value(&self.phone)
    }
}

impl From<&Customer> for CustomerProfile {
    fn from(customer: &Customer) -> Self {
        Self {
            name: (!customer.name.is_empty()).then(|| customer.name.clone()),
            email: customer.email.clone(),
            phone: customer.phone.clone(),
            address: customer.address.clone(),
        }
    }
}

fn has_value(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.trim().is_empty())
}
