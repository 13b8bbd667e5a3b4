use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub String);

/// Catalog entry referenced by request line items. The catalog itself is owned elsewhere;
/// the workflow only reads it to reject unknown or retired materials.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub unit_of_measure: String,
    pub unit_price: Decimal,
    pub active: bool,
}
