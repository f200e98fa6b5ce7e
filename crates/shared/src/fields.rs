//! Static field registry for the projects view.

use std::collections::HashMap;

use crate::domain::{ProjectFieldName, ProjectsOrder};

/// Identity of the built-in "My Projects" view.
pub const HOME_VIEW_UID: &str = "kobo_my_projects";
/// Server query every projects view starts from.
pub const HOME_BASE_QUERY: &str = "asset_type:survey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: ProjectFieldName,
    pub label: &'static str,
    /// Lookup path the server query language filters on.
    pub api_filtering_name: &'static str,
    pub api_ordering_name: Option<&'static str>,
    /// Where the value lives in an asset payload.
    pub value_path: &'static str,
    pub is_orderable: bool,
    pub is_default_visible: bool,
    /// Excluded fields are never shown, filtered on or ordered by in this view.
    pub excluded: bool,
}

impl FieldDefinition {
    pub fn can_order(&self) -> bool {
        self.is_orderable && !self.excluded && self.api_ordering_name.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FieldRegistry {
    definitions: Vec<FieldDefinition>,
    index: HashMap<ProjectFieldName, usize>,
}

impl FieldRegistry {
    pub fn new(definitions: Vec<FieldDefinition>) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(position, definition)| (definition.name, position))
            .collect();
        Self { definitions, index }
    }

    /// Field table of the "My Projects" view.
    pub fn projects() -> Self {
        use ProjectFieldName as F;

        fn def(
            name: ProjectFieldName,
            label: &'static str,
            api_filtering_name: &'static str,
            api_ordering_name: Option<&'static str>,
            value_path: &'static str,
        ) -> FieldDefinition {
            FieldDefinition {
                name,
                label,
                api_filtering_name,
                api_ordering_name,
                value_path,
                is_orderable: false,
                is_default_visible: false,
                excluded: false,
            }
        }

        let mut definitions = vec![
            def(F::Name, "Project name", "name", Some("name"), "name"),
            def(
                F::Description,
                "Description",
                "settings__description",
                None,
                "settings__description",
            ),
            def(
                F::Status,
                "Status",
                "_deployment_status",
                Some("_deployment_status"),
                "deployment_status",
            ),
            def(
                F::OwnerUsername,
                "Owner",
                "owner__username",
                Some("owner__username"),
                "owner__username",
            ),
            def(
                F::OwnerFullName,
                "Owner full name",
                "owner__extra_details__data__name",
                Some("owner__extra_details__data__name"),
                "owner__name",
            ),
            def(
                F::OwnerEmail,
                "Owner email",
                "owner__email",
                Some("owner__email"),
                "owner__email",
            ),
            def(
                F::OwnerOrganization,
                "Owner organization",
                "owner__extra_details__data__organization",
                Some("owner__extra_details__data__organization"),
                "owner__organization",
            ),
            def(
                F::DateModified,
                "Last modified",
                "date_modified__date",
                Some("date_modified"),
                "date_modified",
            ),
            def(
                F::DateDeployed,
                "Date deployed",
                "date_deployed__date",
                Some("date_deployed"),
                "date_deployed",
            ),
            def(
                F::Sector,
                "Sector",
                "settings__sector",
                Some("settings__sector"),
                "settings__sector",
            ),
            def(
                F::Countries,
                "Countries",
                "settings__country_codes[]",
                Some("settings__country_codes"),
                "settings__country",
            ),
            def(
                F::Languages,
                "Languages",
                "summary__languages[]",
                Some("summary__languages"),
                "summary__languages",
            ),
            def(
                F::Submissions,
                "Submissions",
                "deployment__submission_count",
                Some("deployment__submission_count"),
                "deployment__submission_count",
            ),
        ];

        const ORDERABLE: [ProjectFieldName; 5] = [
            F::DateModified,
            F::DateDeployed,
            F::Name,
            F::OwnerUsername,
            F::Status,
        ];
        const DEFAULT_VISIBLE: [ProjectFieldName; 7] = [
            F::DateModified,
            F::DateDeployed,
            F::Name,
            F::Countries,
            F::OwnerUsername,
            F::Status,
            F::Submissions,
        ];
        const EXCLUDED: [ProjectFieldName; 3] =
            [F::OwnerFullName, F::OwnerEmail, F::OwnerOrganization];

        for definition in &mut definitions {
            definition.is_orderable = ORDERABLE.contains(&definition.name);
            definition.is_default_visible = DEFAULT_VISIBLE.contains(&definition.name);
            definition.excluded = EXCLUDED.contains(&definition.name);
        }

        Self::new(definitions)
    }

    pub fn get(&self, name: ProjectFieldName) -> Option<&FieldDefinition> {
        self.index
            .get(&name)
            .and_then(|position| self.definitions.get(*position))
    }

    pub fn definitions(&self) -> &[FieldDefinition] {
        &self.definitions
    }

    /// Unknown fields count as excluded.
    pub fn is_excluded(&self, name: ProjectFieldName) -> bool {
        self.get(name).map_or(true, |definition| definition.excluded)
    }

    pub fn is_orderable(&self, name: ProjectFieldName) -> bool {
        self.get(name).is_some_and(FieldDefinition::can_order)
    }

    /// Default visible fields in registry order.
    pub fn default_visible_fields(&self) -> Vec<ProjectFieldName> {
        self.definitions
            .iter()
            .filter(|definition| definition.is_default_visible && !definition.excluded)
            .map(|definition| definition.name)
            .collect()
    }

    pub fn orderable_fields(&self) -> Vec<ProjectFieldName> {
        self.definitions
            .iter()
            .filter(|definition| definition.can_order())
            .map(|definition| definition.name)
            .collect()
    }

    /// `ordering` query value, e.g. `-date_modified`.
    pub fn ordering_param(&self, order: &ProjectsOrder) -> Option<String> {
        let definition = self.get(order.field_name)?;
        if !definition.can_order() {
            return None;
        }
        let api_name = definition.api_ordering_name?;
        Some(format!("{}{api_name}", order.direction.ordering_prefix()))
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::projects()
    }
}

#[cfg(test)]
#[path = "tests/fields_tests.rs"]
mod tests;
