//! Diploma aggregate

use super::{school_key, EntityKind, EntityRef};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

/// Diploma as described by the predictor, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DiplomaAttributes {
    #[validate(length(min = 1, max = 512))]
    pub name: String,

    pub city: Option<String>,

    pub school: Option<String>,

    /// Length of the programme in years
    #[validate(range(min = 0, max = 20))]
    pub duration: Option<i32>,

    pub mention: Option<String>,

    #[serde(default)]
    pub careers: Vec<String>,

    #[serde(default)]
    pub employment_opportunities: Vec<String>,

    #[serde(default)]
    pub filieres: Vec<String>,

    #[serde(default)]
    pub subjects: Vec<String>,

    #[serde(default)]
    pub student_subjects: Vec<String>,

    #[serde(default)]
    pub previous_diplomas: Vec<String>,
}

impl DiplomaAttributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Validate and normalize into the persisted shape.
    ///
    /// Names are trimmed, blank list entries are dropped and duplicates
    /// collapse. Blank optional scalars become absent.
    pub fn into_diploma(self) -> Result<Diploma> {
        self.validate()?;

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name", "diploma name must not be empty"));
        }

        Ok(Diploma {
            name,
            city: clean_scalar(self.city),
            school: clean_scalar(self.school),
            duration: self.duration,
            mention: clean_scalar(self.mention),
            careers: clean_list(self.careers),
            employment_opportunities: clean_list(self.employment_opportunities),
            filieres: clean_list(self.filieres),
            subjects: clean_list(self.subjects),
            student_subjects: clean_list(self.student_subjects),
            previous_diplomas: clean_list(self.previous_diplomas),
        })
    }
}

fn clean_scalar(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_list(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Persisted diploma with its reference edges resolved to names.
///
/// Prior diplomas are kept one level deep, as names only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diploma {
    pub name: String,
    pub city: Option<String>,
    pub school: Option<String>,
    pub duration: Option<i32>,
    pub mention: Option<String>,
    pub careers: BTreeSet<String>,
    pub employment_opportunities: BTreeSet<String>,
    pub filieres: BTreeSet<String>,
    pub subjects: BTreeSet<String>,
    pub student_subjects: BTreeSet<String>,
    pub previous_diplomas: BTreeSet<String>,
}

impl Diploma {
    /// Every reference edge of this diploma, ordered and unique.
    pub fn links(&self) -> BTreeSet<EntityRef> {
        let mut links = BTreeSet::new();

        if let Some(city) = &self.city {
            links.insert(EntityRef::new(EntityKind::City, city.clone()));
        }
        if let Some(school) = &self.school {
            links.insert(EntityRef::new(
                EntityKind::School,
                school_key(school, self.city.as_deref()),
            ));
        }
        if let Some(mention) = &self.mention {
            links.insert(EntityRef::new(EntityKind::Mention, mention.clone()));
        }

        let lists = [
            (EntityKind::Career, &self.careers),
            (EntityKind::EmploymentOpportunity, &self.employment_opportunities),
            (EntityKind::Filiere, &self.filieres),
            (EntityKind::Subject, &self.subjects),
            (EntityKind::StudentSubject, &self.student_subjects),
            (EntityKind::PreviousDiploma, &self.previous_diplomas),
        ];
        for (kind, names) in lists {
            links.extend(names.iter().map(|name| EntityRef::new(kind, name.clone())));
        }

        links
    }

    /// Rebuild a diploma from its stored scalars and edges.
    ///
    /// City and school edges are implied by the scalar columns and skipped.
    pub fn from_links(
        name: String,
        city: Option<String>,
        school: Option<String>,
        duration: Option<i32>,
        links: impl IntoIterator<Item = EntityRef>,
    ) -> Self {
        let mut diploma = Diploma {
            name,
            city,
            school,
            duration,
            ..Default::default()
        };

        for link in links {
            match link.kind {
                EntityKind::Mention => {
                    if diploma.mention.is_none() {
                        diploma.mention = Some(link.name);
                    }
                }
                EntityKind::Career => {
                    diploma.careers.insert(link.name);
                }
                EntityKind::EmploymentOpportunity => {
                    diploma.employment_opportunities.insert(link.name);
                }
                EntityKind::Filiere => {
                    diploma.filieres.insert(link.name);
                }
                EntityKind::Subject => {
                    diploma.subjects.insert(link.name);
                }
                EntityKind::StudentSubject => {
                    diploma.student_subjects.insert(link.name);
                }
                EntityKind::PreviousDiploma => {
                    diploma.previous_diplomas.insert(link.name);
                }
                EntityKind::City | EntityKind::School => {}
            }
        }

        diploma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> DiplomaAttributes {
        DiplomaAttributes {
            name: "  CS-BSc ".into(),
            city: Some("Rabat".into()),
            school: Some("  ".into()),
            duration: Some(3),
            mention: Some("Sciences".into()),
            careers: vec!["Software Engineer".into(), " Software Engineer".into(), "".into()],
            previous_diplomas: vec!["Bac".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_normalization() {
        let diploma = attributes().into_diploma().unwrap();
        assert_eq!(diploma.name, "CS-BSc");
        assert_eq!(diploma.school, None);
        assert_eq!(diploma.careers.len(), 1);
        assert!(diploma.careers.contains("Software Engineer"));
    }

    #[test]
    fn test_rejects_negative_duration_and_blank_name() {
        let mut attrs = attributes();
        attrs.duration = Some(-1);
        assert!(matches!(attrs.into_diploma(), Err(AppError::Validation { .. })));

        let blank = DiplomaAttributes::named("   ");
        assert!(matches!(blank.into_diploma(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_links_round_trip_through_storage_shape() {
        let mut attrs = attributes();
        attrs.school = Some("ENSIAS".into());
        let diploma = attrs.into_diploma().unwrap();

        let links = diploma.links();
        assert!(links.contains(&EntityRef::new(EntityKind::School, "ENSIAS@Rabat")));
        assert!(links.contains(&EntityRef::new(EntityKind::City, "Rabat")));
        assert!(links.contains(&EntityRef::new(EntityKind::PreviousDiploma, "Bac")));

        let rebuilt = Diploma::from_links(
            diploma.name.clone(),
            diploma.city.clone(),
            diploma.school.clone(),
            diploma.duration,
            links,
        );
        assert_eq!(rebuilt, diploma);
    }
}
