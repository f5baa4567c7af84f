//! Procurement requests and groups, the engine's inbound boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use stockflow_core::{
    CompanyId, GroupId, LocationId, PackageTypeId, ProductId, RouteId, WarehouseId,
};

/// A demand for stock submitted by an external caller (sales, replenishment
/// rules, manufacturing).
///
/// `values` is an open configuration bag. Recognized keys: `route_ids`,
/// `warehouse_id`, `group_id`, `date_planned`, `priority`, `orderpoint_id`,
/// `product_packaging_id`. Unrecognized keys travel opaquely onto the
/// created moves for downstream extension points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    pub product: ProductId,
    pub quantity: f64,
    /// Unit-of-measure label, informational for reporting.
    pub uom: String,
    pub location: LocationId,
    pub name: String,
    pub origin: Option<String>,
    pub company: Option<CompanyId>,
    pub values: Map<String, Value>,
}

impl ProcurementRequest {
    pub fn new(
        product: ProductId,
        quantity: f64,
        location: LocationId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            product,
            quantity,
            uom: "unit".to_string(),
            location,
            name: name.into(),
            origin: None,
            company: None,
            values: Map::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_company(mut self, company: CompanyId) -> Self {
        self.company = Some(company);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn route_hints(&self) -> Vec<RouteId> {
        route_hints_from(&self.values)
    }

    pub fn warehouse(&self) -> Option<WarehouseId> {
        id_from(&self.values, "warehouse_id")
    }

    pub fn group(&self) -> Option<GroupId> {
        id_from(&self.values, "group_id")
    }

    pub fn date_planned(&self) -> Option<DateTime<Utc>> {
        date_planned_from(&self.values)
    }

    pub fn priority(&self) -> u8 {
        priority_from(&self.values)
    }

    pub fn package_type(&self) -> Option<PackageTypeId> {
        package_type_from(&self.values)
    }
}

/// Correlation key shared by moves originating from one business need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementGroup {
    pub id: GroupId,
    pub name: String,
}

impl ProcurementGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
        }
    }
}

/// Parse a typed id from a string value in the bag. Malformed entries are
/// treated as absent.
fn id_from<T: std::str::FromStr>(values: &Map<String, Value>, key: &str) -> Option<T> {
    values
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

pub fn route_hints_from(values: &Map<String, Value>) -> Vec<RouteId> {
    values
        .get("route_ids")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|v| v.as_str().and_then(|s| s.parse().ok()))
                .collect()
        })
        .unwrap_or_default()
}

pub fn warehouse_from(values: &Map<String, Value>) -> Option<WarehouseId> {
    id_from(values, "warehouse_id")
}

pub fn date_planned_from(values: &Map<String, Value>) -> Option<DateTime<Utc>> {
    values
        .get("date_planned")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

pub fn priority_from(values: &Map<String, Value>) -> u8 {
    values
        .get("priority")
        .and_then(Value::as_u64)
        .map(|p| p.min(u8::MAX as u64) as u8)
        .unwrap_or(1)
}

pub fn package_type_from(values: &Map<String, Value>) -> Option<PackageTypeId> {
    id_from(values, "product_packaging_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognized_values_are_parsed() {
        let route = RouteId::new();
        let group = GroupId::new();
        let request = ProcurementRequest::new(ProductId::new(), 5.0, LocationId::new(), "REQ1")
            .with_value("route_ids", json!([route.to_string(), "not a uuid"]))
            .with_value("group_id", json!(group.to_string()))
            .with_value("priority", json!(3))
            .with_value("date_planned", json!("2026-09-01T08:00:00Z"))
            .with_value("custom_extension", json!({"free": "form"}));

        assert_eq!(request.route_hints(), vec![route]);
        assert_eq!(request.group(), Some(group));
        assert_eq!(request.priority(), 3);
        assert!(request.date_planned().is_some());
        // Unrecognized keys stay in the bag untouched.
        assert!(request.values.contains_key("custom_extension"));
    }

    #[test]
    fn missing_values_fall_back() {
        let request = ProcurementRequest::new(ProductId::new(), 5.0, LocationId::new(), "REQ2");
        assert!(request.route_hints().is_empty());
        assert_eq!(request.priority(), 1);
        assert!(request.warehouse().is_none());
        assert!(request.date_planned().is_none());
    }
}
