//! Structured query parameters understood by Fulton REST endpoints.
//!
//! Rendered as `filter[field]=value`, `sort=a,-b`, `projection=a,-b`,
//! `includes=a,b` and `pagination[index]=n&pagination[size]=n`.

use crate::url::encode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub index: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub filter: Vec<(String, String)>,
    pub sort: Vec<(String, SortOrder)>,
    pub projection: Vec<(String, bool)>,
    pub includes: Vec<String>,
    pub pagination: Option<PageRequest>,
}

impl QueryParams {
    pub fn filter(&mut self, field: impl Into<String>, value: impl ToString) -> &mut Self {
        self.filter.push((field.into(), value.to_string()));
        self
    }

    pub fn sort(&mut self, field: impl Into<String>, order: SortOrder) -> &mut Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Include (`true`) or exclude (`false`) a field from the returned
    /// entities.
    pub fn project(&mut self, field: impl Into<String>, include: bool) -> &mut Self {
        self.projection.push((field.into(), include));
        self
    }

    pub fn include(&mut self, relation: impl Into<String>) -> &mut Self {
        self.includes.push(relation.into());
        self
    }

    pub fn page(&mut self, index: u32, size: u32) -> &mut Self {
        self.pagination = Some(PageRequest { index, size });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
            && self.sort.is_empty()
            && self.projection.is_empty()
            && self.includes.is_empty()
            && self.pagination.is_none()
    }

    /// Render without the leading `?`. Empty when nothing is set.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();

        for (field, value) in &self.filter {
            parts.push(format!("filter[{}]={}", encode(field), encode(value)));
        }

        if !self.sort.is_empty() {
            let fields: Vec<String> = self
                .sort
                .iter()
                .map(|(field, order)| match order {
                    SortOrder::Asc => encode(field),
                    SortOrder::Desc => format!("-{}", encode(field)),
                })
                .collect();
            parts.push(format!("sort={}", fields.join(",")));
        }

        if !self.projection.is_empty() {
            let fields: Vec<String> = self
                .projection
                .iter()
                .map(|(field, include)| {
                    if *include {
                        encode(field)
                    } else {
                        format!("-{}", encode(field))
                    }
                })
                .collect();
            parts.push(format!("projection={}", fields.join(",")));
        }

        if !self.includes.is_empty() {
            let fields: Vec<String> = self.includes.iter().map(|field| encode(field)).collect();
            parts.push(format!("includes={}", fields.join(",")));
        }

        if let Some(page) = self.pagination {
            parts.push(format!("pagination[index]={}", page.index));
            parts.push(format!("pagination[size]={}", page.size));
        }

        parts.join("&")
    }
}
