use std::fmt;

/// The independent principal types the app can sign in as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKind {
    Student,
    Admin,
    Moderator,
    ClubModerator,
    Company,
}

impl IdentityKind {
    pub const ALL: [IdentityKind; 5] = [
        IdentityKind::Student,
        IdentityKind::Admin,
        IdentityKind::Moderator,
        IdentityKind::ClubModerator,
        IdentityKind::Company,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Student => "student",
            IdentityKind::Admin => "admin",
            IdentityKind::Moderator => "moderator",
            IdentityKind::ClubModerator => "club_moderator",
            IdentityKind::Company => "company",
        }
    }

    /// Prefix of every secure-storage key owned by this kind.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            IdentityKind::Student => "studentUS",
            IdentityKind::Admin => "adminUS",
            IdentityKind::Moderator => "moderatorUS",
            IdentityKind::ClubModerator => "clubUS",
            IdentityKind::Company => "companyUS",
        }
    }

    /// Full secure-storage key, e.g. `studentUSTkn`.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.key_prefix(), suffix)
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key suffixes of the persisted credential record.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "Tkn";
    pub const REFRESH_TOKEN: &str = "RfTkn";
    pub const ACCOUNT_ID: &str = "Id";
    pub const NAME: &str = "Name";
    pub const ROLE: &str = "Role";
    pub const STATUS: &str = "Status";
    pub const LANGUAGE: &str = "Lang";
    pub const UNIVERSITY_ID: &str = "UniId";
    pub const CLUB_ID: &str = "ClubId";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_student_key_names() {
        let kind = IdentityKind::Student;
        assert_eq!(kind.key(keys::ACCESS_TOKEN), "studentUSTkn");
        assert_eq!(kind.key(keys::REFRESH_TOKEN), "studentUSRfTkn");
        assert_eq!(kind.key(keys::LANGUAGE), "studentUSLang");
    }

    #[test]
    fn test_prefixes_are_distinct() {
        let prefixes: HashSet<_> = IdentityKind::ALL.iter().map(|k| k.key_prefix()).collect();
        assert_eq!(prefixes.len(), IdentityKind::ALL.len());
        for (i, kind) in IdentityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
