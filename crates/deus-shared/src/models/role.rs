use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "app_role", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    #[default]
    Viewer,
}

impl Role {
    pub fn can_edit(&self) -> bool {
        matches!(self, Self::Admin | Self::Editor)
    }

    pub fn can_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admins_and_editors_can_edit() {
        assert!(!Role::Viewer.can_edit());
        assert!(Role::Editor.can_edit());
        assert!(Role::Admin.can_edit());
    }

    #[test]
    fn only_admins_can_admin() {
        assert!(Role::Admin.can_admin());
        assert!(!Role::Editor.can_admin());
        assert!(!Role::Viewer.can_admin());
    }

    #[test]
    fn missing_role_means_viewer() {
        assert_eq!(Role::default(), Role::Viewer);
    }
}
