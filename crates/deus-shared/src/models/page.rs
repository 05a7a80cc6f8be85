use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "page_kind", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Folder,
    Doc,
    Sop,
    Report,
    Calendar,
    Link,
}

/// Named accent used when a kind is drawn; clients map it to their own palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Gray,
    White,
    Yellow,
    Blue,
    Green,
    Magenta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMeta {
    pub icon: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub accent: Accent,
}

// Indexed by `PageKind as usize`.
const KIND_TABLE: [KindMeta; 6] = [
    KindMeta {
        icon: "📁",
        label: "Folder",
        description: "Group pages together",
        accent: Accent::Gray,
    },
    KindMeta {
        icon: "📄",
        label: "Doc",
        description: "General document / notes",
        accent: Accent::White,
    },
    KindMeta {
        icon: "📘",
        label: "SOP",
        description: "Standard operating procedure",
        accent: Accent::Yellow,
    },
    KindMeta {
        icon: "📊",
        label: "Report",
        description: "Reports and insight",
        accent: Accent::Blue,
    },
    KindMeta {
        icon: "📅",
        label: "Calendar",
        description: "Schedule / timeline",
        accent: Accent::Green,
    },
    KindMeta {
        icon: "🔗",
        label: "Link",
        description: "Google Docs/Sheets/URL",
        accent: Accent::Magenta,
    },
];

impl PageKind {
    pub const ALL: [PageKind; 6] = [
        PageKind::Sop,
        PageKind::Doc,
        PageKind::Report,
        PageKind::Calendar,
        PageKind::Folder,
        PageKind::Link,
    ];

    pub fn meta(self) -> &'static KindMeta {
        &KIND_TABLE[self as usize]
    }

    pub fn is_folder(self) -> bool {
        matches!(self, Self::Folder)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Doc => "doc",
            Self::Sop => "sop",
            Self::Report => "report",
            Self::Calendar => "calendar",
            Self::Link => "link",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folder" => Ok(Self::Folder),
            "doc" => Ok(Self::Doc),
            "sop" => Ok(Self::Sop),
            "report" => Ok(Self::Report),
            "calendar" => Ok(Self::Calendar),
            "link" => Ok(Self::Link),
            other => Err(format!("unknown page kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "page_status", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Draft,
    #[default]
    Published,
}

impl PageStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Draft => Self::Published,
            Self::Published => Self::Draft,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Published => "Published",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub slug: String,
    pub kind: PageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub status: PageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PageRecord {
    /// Custom icon when set and non-blank, otherwise the kind's default.
    pub fn display_icon(&self) -> &str {
        match self.icon.as_deref().map(str::trim) {
            Some(icon) if !icon.is_empty() => icon,
            _ => self.kind.meta().icon,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: PageKind, icon: Option<&str>) -> PageRecord {
        PageRecord {
            id: Uuid::new_v4(),
            parent_id: None,
            title: "Onboarding".to_string(),
            slug: "onboarding".to_string(),
            kind,
            icon: icon.map(str::to_string),
            status: PageStatus::Published,
            content_html: None,
            external_url: None,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn kind_table_lines_up_with_variants() {
        assert_eq!(PageKind::Folder.meta().label, "Folder");
        assert_eq!(PageKind::Doc.meta().label, "Doc");
        assert_eq!(PageKind::Sop.meta().label, "SOP");
        assert_eq!(PageKind::Report.meta().label, "Report");
        assert_eq!(PageKind::Calendar.meta().label, "Calendar");
        assert_eq!(PageKind::Link.meta().label, "Link");
    }

    #[test]
    fn kind_parses_from_wire_names() {
        for kind in PageKind::ALL {
            assert_eq!(kind.as_str().parse::<PageKind>(), Ok(kind));
        }
        assert!("wiki".parse::<PageKind>().is_err());
    }

    #[test]
    fn icon_falls_back_to_kind_default() {
        assert_eq!(record(PageKind::Report, None).display_icon(), "📊");
        assert_eq!(record(PageKind::Report, Some("   ")).display_icon(), "📊");
        assert_eq!(record(PageKind::Report, Some("🎯")).display_icon(), "🎯");
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&PageKind::Sop).unwrap();
        assert_eq!(json, "\"sop\"");
        let status: PageStatus = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(status, PageStatus::Draft);
    }
}
