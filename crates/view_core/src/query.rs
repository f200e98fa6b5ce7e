//! Translation of view filters and order into the server's query language.

use shared::{
    domain::{FilterCondition, ProjectsFilter, ProjectsOrder},
    fields::FieldRegistry,
};

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Query fragment for a single filter. `None` for inert filters and for
/// fields the registry does not know or excludes.
pub fn filter_fragment(registry: &FieldRegistry, filter: &ProjectsFilter) -> Option<String> {
    let definition = registry.get(filter.field_name)?;
    if definition.excluded || filter.is_inert() {
        return None;
    }
    let field = definition.api_filtering_name;
    let value = filter.value.as_deref().map(quote).unwrap_or_default();

    let fragment = match filter.condition {
        FilterCondition::Contains => format!("{field}__icontains:{value}"),
        FilterCondition::DoesNotContain => format!("NOT {field}__icontains:{value}"),
        FilterCondition::Is => format!("{field}__iexact:{value}"),
        FilterCondition::IsNot => format!("NOT {field}__iexact:{value}"),
        FilterCondition::StartsWith => format!("{field}__istartswith:{value}"),
        FilterCondition::EndsWith => format!("{field}__iendswith:{value}"),
        FilterCondition::IsEmpty => format!("{field}:\"\""),
        FilterCondition::IsNotEmpty => format!("NOT {field}:\"\""),
        FilterCondition::IsEmptyObject => format!("{field}:{{}}"),
        FilterCondition::IsNotEmptyObject => format!("NOT {field}:{{}}"),
    };
    Some(fragment)
}

pub fn build_filter_queries(registry: &FieldRegistry, filters: &[ProjectsFilter]) -> Vec<String> {
    filters
        .iter()
        .filter_map(|filter| filter_fragment(registry, filter))
        .collect()
}

/// Full `q` parameter: the base query AND-ed with every active filter.
pub fn build_search_query(
    registry: &FieldRegistry,
    base_query: &str,
    filters: &[ProjectsFilter],
) -> String {
    let filters = build_filter_queries(registry, filters).join(" AND ");
    let base_query = base_query.trim();
    match (base_query.is_empty(), filters.is_empty()) {
        (_, true) => base_query.to_string(),
        (true, false) => filters,
        (false, false) => format!("({base_query}) AND ({filters})"),
    }
}

pub fn ordering_param(registry: &FieldRegistry, order: Option<&ProjectsOrder>) -> Option<String> {
    order.and_then(|order| registry.ordering_param(order))
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
