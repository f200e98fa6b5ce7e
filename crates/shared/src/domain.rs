use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! uid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uid_newtype!(AssetUid);
uid_newtype!(ViewUid);

/// Every attribute of a project that the projects view knows how to show,
/// filter or order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectFieldName {
    Name,
    Description,
    Status,
    OwnerUsername,
    OwnerFullName,
    OwnerEmail,
    OwnerOrganization,
    DateModified,
    DateDeployed,
    Sector,
    Countries,
    Languages,
    Submissions,
}

impl ProjectFieldName {
    pub const ALL: [ProjectFieldName; 13] = [
        ProjectFieldName::Name,
        ProjectFieldName::Description,
        ProjectFieldName::Status,
        ProjectFieldName::OwnerUsername,
        ProjectFieldName::OwnerFullName,
        ProjectFieldName::OwnerEmail,
        ProjectFieldName::OwnerOrganization,
        ProjectFieldName::DateModified,
        ProjectFieldName::DateDeployed,
        ProjectFieldName::Sector,
        ProjectFieldName::Countries,
        ProjectFieldName::Languages,
        ProjectFieldName::Submissions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectFieldName::Name => "name",
            ProjectFieldName::Description => "description",
            ProjectFieldName::Status => "status",
            ProjectFieldName::OwnerUsername => "ownerUsername",
            ProjectFieldName::OwnerFullName => "ownerFullName",
            ProjectFieldName::OwnerEmail => "ownerEmail",
            ProjectFieldName::OwnerOrganization => "ownerOrganization",
            ProjectFieldName::DateModified => "dateModified",
            ProjectFieldName::DateDeployed => "dateDeployed",
            ProjectFieldName::Sector => "sector",
            ProjectFieldName::Countries => "countries",
            ProjectFieldName::Languages => "languages",
            ProjectFieldName::Submissions => "submissions",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for ProjectFieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterCondition {
    Contains,
    DoesNotContain,
    Is,
    IsNot,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    IsEmptyObject,
    IsNotEmptyObject,
}

impl FilterCondition {
    pub const ALL: [FilterCondition; 10] = [
        FilterCondition::Contains,
        FilterCondition::DoesNotContain,
        FilterCondition::Is,
        FilterCondition::IsNot,
        FilterCondition::StartsWith,
        FilterCondition::EndsWith,
        FilterCondition::IsEmpty,
        FilterCondition::IsNotEmpty,
        FilterCondition::IsEmptyObject,
        FilterCondition::IsNotEmptyObject,
    ];

    /// Conditions that test for presence only and are complete without a value.
    pub fn requires_value(self) -> bool {
        !matches!(
            self,
            FilterCondition::IsEmpty
                | FilterCondition::IsNotEmpty
                | FilterCondition::IsEmptyObject
                | FilterCondition::IsNotEmptyObject
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterCondition::Contains => "contains",
            FilterCondition::DoesNotContain => "doesNotContain",
            FilterCondition::Is => "is",
            FilterCondition::IsNot => "isNot",
            FilterCondition::StartsWith => "startsWith",
            FilterCondition::EndsWith => "endsWith",
            FilterCondition::IsEmpty => "isEmpty",
            FilterCondition::IsNotEmpty => "isNotEmpty",
            FilterCondition::IsEmptyObject => "isEmptyObject",
            FilterCondition::IsNotEmptyObject => "isNotEmptyObject",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|condition| condition.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsFilter {
    pub field_name: ProjectFieldName,
    pub condition: FilterCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ProjectsFilter {
    pub fn new(
        field_name: ProjectFieldName,
        condition: FilterCondition,
        value: Option<String>,
    ) -> Self {
        Self {
            field_name,
            condition,
            value,
        }
    }

    /// An inert filter is kept for display but contributes nothing to a query.
    pub fn is_inert(&self) -> bool {
        self.condition.requires_value()
            && self.value.as_deref().map_or(true, |value| value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn ordering_prefix(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "",
            OrderDirection::Descending => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsOrder {
    pub field_name: ProjectFieldName,
    pub direction: OrderDirection,
}

impl ProjectsOrder {
    pub fn new(field_name: ProjectFieldName, direction: OrderDirection) -> Self {
        Self {
            field_name,
            direction,
        }
    }
}

/// Opaque continuation token; only ever replayed against the query that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Immutable snapshot of one project as returned by the assets endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub uid: AssetUid,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl ProjectRow {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: AssetUid::new(uid),
            name: name.into(),
            values: Map::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Looks up a raw value by server lookup path, e.g. `owner__username`.
    /// Flat keys that contain `__` themselves win over nested traversal.
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }
        let mut segments = path.split("__");
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
