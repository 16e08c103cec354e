//! Property search filters.
//!
//! The public query string is parsed once into a [`PropertyFilter`], which
//! renders the `WHERE` and `ORDER BY` clauses of the search query. Dashboard
//! table controls ([`DashboardQuery`]) work on rows already loaded.

use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

use crate::db::models::{DashboardProperty, PropertyStatus};

/// Raw query parameters of the public listing page.
///
/// Values stay strings so a malformed number drops the constraint instead of
/// rejecting the whole request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub tipo: Option<String>,
    pub type_id: Option<String>,
    pub loc: Option<String>,
    pub amenities: Option<String>,
    pub bedrooms: Option<String>,
    pub bathrooms: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertySort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

impl PropertySort {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("price_asc") => PropertySort::PriceAsc,
            Some("price_desc") => PropertySort::PriceDesc,
            _ => PropertySort::Newest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyFilter {
    pub status: Option<PropertyStatus>,
    pub type_id: Option<i32>,
    pub city: Option<String>,
    pub min_bedrooms: Option<i32>,
    pub min_bathrooms: Option<i32>,
    /// Sorted, without duplicates
    pub amenity_ids: Vec<i32>,
    pub sort: PropertySort,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number(value: &Option<String>) -> Option<i32> {
    non_empty(value).and_then(|s| s.parse().ok())
}

/// `"1, 4,x,4"` -> `[1, 4]`
pub fn parse_amenity_ids(raw: &str) -> Vec<i32> {
    let mut ids: Vec<i32> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl PropertyFilter {
    pub fn from_params(params: &SearchParams) -> Self {
        let status = match non_empty(&params.tipo) {
            Some("venta") => Some(PropertyStatus::EnVenta),
            Some("alquiler") => Some(PropertyStatus::EnAlquiler),
            _ => None,
        };

        Self {
            status,
            type_id: parse_number(&params.type_id),
            city: non_empty(&params.loc).map(str::to_string),
            min_bedrooms: parse_number(&params.bedrooms),
            min_bathrooms: parse_number(&params.bathrooms),
            amenity_ids: non_empty(&params.amenities)
                .map(parse_amenity_ids)
                .unwrap_or_default(),
            sort: PropertySort::parse(non_empty(&params.sort_by)),
        }
    }

    /// Appends ` WHERE ...` for the `properties p` table.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");

        if let Some(status) = self.status {
            qb.push(" AND p.status = ").push_bind(status);
        }
        if let Some(type_id) = self.type_id {
            qb.push(" AND p.property_type_id = ").push_bind(type_id);
        }
        if let Some(city) = &self.city {
            qb.push(" AND p.city = ").push_bind(city.clone());
        }
        if let Some(bedrooms) = self.min_bedrooms {
            qb.push(" AND p.bedrooms >= ").push_bind(bedrooms);
        }
        if let Some(bathrooms) = self.min_bathrooms {
            qb.push(" AND p.bathrooms >= ").push_bind(bathrooms);
        }
        if !self.amenity_ids.is_empty() {
            qb.push(
                " AND (SELECT COUNT(DISTINCT pa.amenity_id) FROM property_amenities pa \
                 WHERE pa.property_id = p.id AND pa.amenity_id = ANY(",
            )
            .push_bind(self.amenity_ids.clone())
            .push(")) = ")
            .push_bind(self.amenity_ids.len() as i64);
        }
    }

    pub fn push_order(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(match self.sort {
            PropertySort::PriceAsc => {
                " ORDER BY p.normalized_price ASC NULLS LAST, p.created_at DESC"
            }
            PropertySort::PriceDesc => {
                " ORDER BY p.normalized_price DESC NULLS LAST, p.created_at DESC"
            }
            PropertySort::Newest => " ORDER BY p.created_at DESC",
        });
    }
}

/// Orders present values (ascending or descending) ahead of missing ones.
pub fn cmp_nulls_last(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Dashboard table controls: free-text search plus column ordering.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    pub q: Option<String>,
    pub sort: Option<String>,
}

impl DashboardQuery {
    /// Filters on title, street or city (case-insensitive) and sorts.
    /// Sort keys: `created_at_desc` (default), `price_asc`, `price_desc`, `city_asc`.
    pub fn apply(&self, rows: &mut Vec<DashboardProperty>) {
        if let Some(needle) = non_empty(&self.q).map(str::to_lowercase) {
            rows.retain(|row| {
                let p = &row.property;
                [Some(&p.title), p.street_address.as_ref(), p.city.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&needle))
            });
        }

        match self.sort.as_deref() {
            Some("price_asc") => {
                rows.sort_by(|a, b| cmp_nulls_last(a.property.price, b.property.price, false))
            }
            Some("price_desc") => {
                rows.sort_by(|a, b| cmp_nulls_last(a.property.price, b.property.price, true))
            }
            Some("city_asc") => rows.sort_by(|a, b| {
                let a = a.property.city.as_deref().unwrap_or("");
                let b = b.property.city.as_deref().unwrap_or("");
                a.to_lowercase().cmp(&b.to_lowercase())
            }),
            _ => rows.sort_by(|a, b| b.property.created_at.cmp(&a.property.created_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Property;
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    const BASE: &str = "SELECT p.id FROM properties p";

    fn params(pairs: &[(&str, &str)]) -> SearchParams {
        let mut p = SearchParams::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "tipo" => p.tipo = v,
                "typeId" => p.type_id = v,
                "loc" => p.loc = v,
                "amenities" => p.amenities = v,
                "bedrooms" => p.bedrooms = v,
                "bathrooms" => p.bathrooms = v,
                "sortBy" => p.sort_by = v,
                _ => unreachable!(),
            }
        }
        p
    }

    fn where_sql(pairs: &[(&str, &str)]) -> String {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(BASE);
        PropertyFilter::from_params(&params(pairs)).push_where(&mut qb);
        qb.sql().to_string()
    }

    fn order_sql(sort_by: &str) -> String {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(BASE);
        PropertyFilter::from_params(&params(&[("sortBy", sort_by)])).push_order(&mut qb);
        qb.sql().trim_start_matches(BASE).to_string()
    }

    const AMENITY_PREDICATE: &str = " AND (SELECT COUNT(DISTINCT pa.amenity_id) \
        FROM property_amenities pa WHERE pa.property_id = p.id AND pa.amenity_id = ANY(";

    #[test]
    fn test_tipo_maps_to_status() {
        assert_eq!(
            PropertyFilter::from_params(&params(&[("tipo", "venta")])).status,
            Some(PropertyStatus::EnVenta)
        );
        assert_eq!(
            PropertyFilter::from_params(&params(&[("tipo", "alquiler")])).status,
            Some(PropertyStatus::EnAlquiler)
        );
        assert_eq!(
            PropertyFilter::from_params(&params(&[("tipo", "permuta")])).status,
            None
        );
    }

    #[test]
    fn test_unparseable_numbers_impose_nothing() {
        let pairs = [("bedrooms", "tres"), ("bathrooms", ""), ("typeId", "casa")];
        assert_eq!(
            PropertyFilter::from_params(&params(&pairs)),
            PropertyFilter::default()
        );
        assert_eq!(where_sql(&pairs), format!("{} WHERE TRUE", BASE));
    }

    #[test]
    fn test_amenity_ids_drop_junk_and_duplicates() {
        assert_eq!(parse_amenity_ids("4, 1,x,4,,"), vec![1, 4]);
        assert!(parse_amenity_ids("pileta").is_empty());
        let filter = PropertyFilter::from_params(&params(&[("amenities", "4,1,4")]));
        assert_eq!(filter.amenity_ids, vec![1, 4]);
    }

    #[test]
    fn test_each_parameter_renders_one_bound_predicate() {
        let cases = [
            ("tipo", "venta", " AND p.status = $1".to_string()),
            ("typeId", "2", " AND p.property_type_id = $1".to_string()),
            ("loc", "Rafaela", " AND p.city = $1".to_string()),
            ("bedrooms", "3", " AND p.bedrooms >= $1".to_string()),
            ("bathrooms", "2", " AND p.bathrooms >= $1".to_string()),
            ("amenities", "1,4", format!("{}$1)) = $2", AMENITY_PREDICATE)),
        ];

        for (key, value, predicate) in cases {
            assert_eq!(
                where_sql(&[(key, value)]),
                format!("{} WHERE TRUE{}", BASE, predicate),
                "parameter {}",
                key
            );
        }
    }

    #[test]
    fn test_combined_parameters_are_joined_with_and() {
        let sql = where_sql(&[
            ("amenities", "4"),
            ("bathrooms", "2"),
            ("bedrooms", "2"),
            ("loc", "Rafaela"),
            ("tipo", "venta"),
            ("typeId", "2"),
        ]);

        assert_eq!(
            sql,
            format!(
                "{} WHERE TRUE AND p.status = $1 AND p.property_type_id = $2 AND p.city = $3 \
                 AND p.bedrooms >= $4 AND p.bathrooms >= $5{}$6)) = $7",
                BASE, AMENITY_PREDICATE
            )
        );
        assert!(!sql.contains(" OR "));
    }

    #[test]
    fn test_price_sorts_put_missing_prices_last() {
        assert_eq!(
            order_sql("price_asc"),
            " ORDER BY p.normalized_price ASC NULLS LAST, p.created_at DESC"
        );
        assert_eq!(
            order_sql("price_desc"),
            " ORDER BY p.normalized_price DESC NULLS LAST, p.created_at DESC"
        );
    }

    #[test]
    fn test_default_sort_is_newest_first() {
        assert_eq!(order_sql(""), " ORDER BY p.created_at DESC");
        assert_eq!(order_sql("cheapest"), " ORDER BY p.created_at DESC");
    }

    #[test]
    fn test_cmp_nulls_last() {
        assert_eq!(cmp_nulls_last(Some(1.0), Some(2.0), false), Ordering::Less);
        assert_eq!(cmp_nulls_last(Some(1.0), Some(2.0), true), Ordering::Greater);
        assert_eq!(cmp_nulls_last(Some(1.0), None, false), Ordering::Less);
        assert_eq!(cmp_nulls_last(None, Some(1.0), true), Ordering::Greater);
        assert_eq!(cmp_nulls_last(None, None, true), Ordering::Equal);
    }

    fn row(
        title: &str,
        street: Option<&str>,
        city: Option<&str>,
        price: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> DashboardProperty {
        DashboardProperty {
            property: Property {
                id: Uuid::new_v4(),
                title: title.to_string(),
                description: None,
                street_address: street.map(str::to_string),
                neighborhood: None,
                city: city.map(str::to_string),
                province: Some("Santa Fe".to_string()),
                price,
                currency: Some("USD".to_string()),
                normalized_price: price.map(|p| p * 1500.0),
                status: PropertyStatus::EnVenta,
                operation_type: Some("venta".to_string()),
                property_type_id: Some(1),
                bedrooms: Some(2),
                bathrooms: Some(1),
                rooms: Some(4),
                total_area: Some(200.0),
                covered_area: Some(120.0),
                expensas: None,
                antiguedad: None,
                cocheras: None,
                latitude: None,
                longitude: None,
                agent_id: None,
                views: 0,
                created_at,
                updated_at: created_at,
            },
            type_name: Some("Casa".to_string()),
            image_urls: vec![],
            can_edit: false,
        }
    }

    fn table() -> Vec<DashboardProperty> {
        let now = Utc::now();
        vec![
            row(
                "Casa quinta",
                Some("Ruta 34 km 5"),
                Some("sunchales"),
                None,
                now - Duration::days(3),
            ),
            row(
                "Departamento centro",
                Some("San Martin 120"),
                Some("Rafaela"),
                Some(80_000.0),
                now,
            ),
            row(
                "Local comercial",
                Some("Bv. Lehmann 400"),
                Some("Esperanza"),
                Some(150_000.0),
                now - Duration::days(1),
            ),
            row("Terreno", None, None, Some(20_000.0), now - Duration::days(2)),
        ]
    }

    fn titles(rows: &[DashboardProperty]) -> Vec<&str> {
        rows.iter().map(|r| r.property.title.as_str()).collect()
    }

    fn apply(q: Option<&str>, sort: Option<&str>) -> Vec<DashboardProperty> {
        let query = DashboardQuery {
            q: q.map(str::to_string),
            sort: sort.map(str::to_string),
        };
        let mut rows = table();
        query.apply(&mut rows);
        rows
    }

    #[test]
    fn test_dashboard_search_matches_title_street_or_city_ignoring_case() {
        assert_eq!(titles(&apply(Some("CASA"), None)), vec!["Casa quinta"]);
        assert_eq!(titles(&apply(Some("san martin"), None)), vec!["Departamento centro"]);
        assert_eq!(titles(&apply(Some("esperanza"), None)), vec!["Local comercial"]);
        assert!(apply(Some("rosario"), None).is_empty());
        assert_eq!(apply(Some("   "), None).len(), 4);
    }

    #[test]
    fn test_dashboard_default_sort_is_newest_first() {
        assert_eq!(
            titles(&apply(None, None)),
            vec!["Departamento centro", "Local comercial", "Terreno", "Casa quinta"]
        );
    }

    #[test]
    fn test_dashboard_price_sorts_keep_missing_prices_last() {
        assert_eq!(
            titles(&apply(None, Some("price_asc"))),
            vec!["Terreno", "Departamento centro", "Local comercial", "Casa quinta"]
        );
        assert_eq!(
            titles(&apply(None, Some("price_desc"))),
            vec!["Local comercial", "Departamento centro", "Terreno", "Casa quinta"]
        );
    }

    #[test]
    fn test_dashboard_city_sort_ignores_case() {
        assert_eq!(
            titles(&apply(None, Some("city_asc"))),
            vec!["Terreno", "Local comercial", "Departamento centro", "Casa quinta"]
        );
    }

    #[test]
    fn test_dashboard_search_then_sort() {
        let rows = apply(Some("a"), Some("price_desc"));
        assert_eq!(
            titles(&rows),
            vec!["Local comercial", "Departamento centro", "Casa quinta"]
        );
    }
}
