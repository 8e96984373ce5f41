use serde::{Deserialize, Serialize};
use std::fmt;

/// Organizational boundary under which points and rankings aggregate independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeKind {
    Class,
    Subject,
    Course,
    Campus,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Class => "CLASS",
            ScopeKind::Subject => "SUBJECT",
            ScopeKind::Course => "COURSE",
            ScopeKind::Campus => "CAMPUS",
        }
    }

    /// All kinds, in fan-out order
    pub fn all() -> [ScopeKind; 4] {
        [
            ScopeKind::Class,
            ScopeKind::Subject,
            ScopeKind::Course,
            ScopeKind::Campus,
        ]
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ScopeKind {
    type Error = crate::error::RewardsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "CLASS" => Ok(ScopeKind::Class),
            "SUBJECT" => Ok(ScopeKind::Subject),
            "COURSE" => Ok(ScopeKind::Course),
            "CAMPUS" => Ok(ScopeKind::Campus),
            other => Err(crate::error::RewardsError::UnknownScopeKind(
                other.to_string(),
            )),
        }
    }
}

/// A concrete scope instance, e.g. (CLASS, "class-3a")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
}

impl Scope {
    pub fn new(kind: ScopeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Scope identifiers denormalized onto an event at write time, so later
/// renames of the organizational tree do not corrupt history.
///
/// Any of the four may be absent; an absent scope simply drops out of the
/// aggregation fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeIds {
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub course_id: Option<String>,
    pub campus_id: Option<String>,
}

impl ScopeIds {
    /// The scopes actually present, in fan-out order
    pub fn present(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(4);
        if let Some(id) = &self.class_id {
            scopes.push(Scope::new(ScopeKind::Class, id.clone()));
        }
        if let Some(id) = &self.subject_id {
            scopes.push(Scope::new(ScopeKind::Subject, id.clone()));
        }
        if let Some(id) = &self.course_id {
            scopes.push(Scope::new(ScopeKind::Course, id.clone()));
        }
        if let Some(id) = &self.campus_id {
            scopes.push(Scope::new(ScopeKind::Campus, id.clone()));
        }
        scopes
    }

    pub fn get(&self, kind: ScopeKind) -> Option<&str> {
        match kind {
            ScopeKind::Class => self.class_id.as_deref(),
            ScopeKind::Subject => self.subject_id.as_deref(),
            ScopeKind::Course => self.course_id.as_deref(),
            ScopeKind::Campus => self.campus_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_kind_roundtrip() {
        for kind in ScopeKind::all() {
            assert_eq!(ScopeKind::try_from(kind.as_str()).unwrap(), kind);
        }
        assert!(ScopeKind::try_from("SCHOOL_DISTRICT").is_err());
    }

    #[test]
    fn test_present_skips_missing_scopes() {
        let ids = ScopeIds {
            class_id: Some("c1".to_string()),
            subject_id: None,
            course_id: Some("g3".to_string()),
            campus_id: None,
        };

        let scopes = ids.present();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0], Scope::new(ScopeKind::Class, "c1"));
        assert_eq!(scopes[1], Scope::new(ScopeKind::Course, "g3"));
    }
}
