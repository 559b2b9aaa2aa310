//! Data model shared by the controller and control-plane implementations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Raw attribute map of a resource as the control plane reports it
pub type Attributes = Map<String, Value>;

/// Resource types managed by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualMachine,
    VirtualMachineAllocation,
    BlockStorage,
    BlockStorageSnapshot,
    NetworkInterface,
    PublicIp,
    Subnet,
    VirtualNetwork,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::VirtualMachine,
        ResourceKind::VirtualMachineAllocation,
        ResourceKind::BlockStorage,
        ResourceKind::BlockStorageSnapshot,
        ResourceKind::NetworkInterface,
        ResourceKind::PublicIp,
        ResourceKind::Subnet,
        ResourceKind::VirtualNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "virtual_machine",
            ResourceKind::VirtualMachineAllocation => "virtual_machine_allocation",
            ResourceKind::BlockStorage => "block_storage",
            ResourceKind::BlockStorageSnapshot => "block_storage_snapshot",
            ResourceKind::NetworkInterface => "network_interface",
            ResourceKind::PublicIp => "public_ip",
            ResourceKind::Subnet => "subnet",
            ResourceKind::VirtualNetwork => "virtual_network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::invalid_input(format!("unknown resource kind: {}", s)))
    }
}

/// Read-only catalogue entries used to resolve names to ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    BlockStorageImage,
    InstanceType,
    Region,
    Zone,
}

impl DataSourceKind {
    pub const ALL: [DataSourceKind; 4] = [
        DataSourceKind::BlockStorageImage,
        DataSourceKind::InstanceType,
        DataSourceKind::Region,
        DataSourceKind::Zone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::BlockStorageImage => "block_storage_image",
            DataSourceKind::InstanceType => "instance_type",
            DataSourceKind::Region => "region",
            DataSourceKind::Zone => "zone",
        }
    }

    /// Human-readable name used in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            DataSourceKind::BlockStorageImage => "block storage image",
            DataSourceKind::InstanceType => "instance type",
            DataSourceKind::Region => "region",
            DataSourceKind::Zone => "zone",
        }
    }

    /// Filters a lookup must carry besides the name
    pub fn required_filters(&self) -> &'static [&'static str] {
        match self {
            DataSourceKind::Zone => &["region_id"],
            _ => &[],
        }
    }

    /// Filters every lookup of this source carries
    pub fn fixed_filters(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            DataSourceKind::InstanceType => &[("activated", "true")],
            _ => &[],
        }
    }

    /// Entries are listed per zone; the control plane's own zone applies
    pub fn is_zone_scoped(&self) -> bool {
        matches!(
            self,
            DataSourceKind::BlockStorageImage | DataSourceKind::InstanceType
        )
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataSourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::invalid_input(format!("unknown data source: {}", s)))
    }
}

/// Filter field matched case-insensitively against entry names
pub const NAME_ILIKE: &str = "name_ilike";

/// One catalogue entry (zone, region, instance type, image)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraRecord {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl InfraRecord {
    pub fn from_json(value: Value) -> Result<Self, String> {
        let Value::Object(mut attributes) = value else {
            return Err("catalogue entry is not a JSON object".to_string());
        };
        match attributes.remove("id") {
            Some(Value::String(id)) => Ok(Self { id, attributes }),
            _ => Err("catalogue entry has no string `id`".to_string()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").and_then(Value::as_str)
    }

    /// True if the entry satisfies `field = value` as a lookup filter
    ///
    /// `name_ilike` compares names case-insensitively; other fields compare
    /// the attribute's textual form.
    pub fn matches(&self, field: &str, value: &str) -> bool {
        if field == NAME_ILIKE {
            return self.name().is_some_and(|name| name.eq_ignore_ascii_case(value));
        }
        match self.attributes.get(field) {
            Some(Value::String(s)) => s == value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == value,
        }
    }
}

/// A resource as returned by a read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub id: String,
    pub status: String,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl RemoteResource {
    /// Build from a JSON object carrying at least `id` and `status`
    pub fn from_json(value: Value) -> Result<Self, String> {
        let Value::Object(mut attributes) = value else {
            return Err("resource payload is not a JSON object".to_string());
        };
        let id = match attributes.remove("id") {
            Some(Value::String(id)) => id,
            _ => return Err("resource payload has no string `id`".to_string()),
        };
        let status = match attributes.remove("status") {
            Some(Value::String(status)) => status,
            _ => return Err(format!("resource {} has no string `status`", id)),
        };
        Ok(Self {
            id,
            status,
            attributes,
        })
    }

    /// Optional relation field; JSON null and absence both mean "unset"
    pub fn relation(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }

    pub fn flag(&self, field: &str) -> bool {
        self.attributes
            .get(field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn to_json(&self) -> Value {
        let mut object = self.attributes.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("status".to_string(), Value::String(self.status.clone()));
        Value::Object(object)
    }
}

/// Partial update body; an explicit `null` clears an optional field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Attributes);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), Value::Null);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Attributes {
        &self.0
    }
}

/// Filter for enumerating dependents: relation field equals id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    criteria: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.insert(field.into(), value.into());
        self
    }

    pub fn criteria(&self) -> impl Iterator<Item = (&str, &str)> {
        self.criteria.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if every criterion matches the resource's attributes
    pub fn matches(&self, resource: &RemoteResource) -> bool {
        self.criteria
            .iter()
            .all(|(field, value)| resource.relation(field) == Some(value.as_str()))
    }
}

/// Response body of a successful delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub status: String,
}

/// One changed field between observed and desired state
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDelta {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Field-level changes handed to an update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDeltas(Vec<FieldDelta>);

impl FieldDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change(
        mut self,
        field: impl Into<String>,
        old: impl Into<Value>,
        new: impl Into<Value>,
    ) -> Self {
        self.0.push(FieldDelta {
            field: field.into(),
            old: old.into(),
            new: new.into(),
        });
        self
    }

    /// Deltas for every desired field whose value differs from the observed one
    pub fn between(observed: &Attributes, desired: &Attributes) -> Self {
        let deltas = desired
            .iter()
            .filter_map(|(field, new)| {
                let old = observed.get(field).cloned().unwrap_or(Value::Null);
                (old != *new).then(|| FieldDelta {
                    field: field.clone(),
                    old,
                    new: new.clone(),
                })
            })
            .collect();
        Self(deltas)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDelta> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
