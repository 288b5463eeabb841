// Authenticated identity of a connection or producer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a platform user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Jobseeker,
    Employer,
    Admin,
}

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Jobseeker, UserRole::Employer, UserRole::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Jobseeker => "jobseeker",
            UserRole::Employer => "employer",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jobseeker" => Ok(UserRole::Jobseeker),
            "employer" => Ok(UserRole::Employer),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// What a verifier resolves a credential to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: UserRole,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: UserRole, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Employer".parse::<UserRole>().unwrap(), UserRole::Employer);
        assert_eq!("ADMIN".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("recruiter".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&UserRole::Jobseeker).unwrap();
        assert_eq!(json, "\"jobseeker\"");
    }
}
