//! Feature Table
//!
//! Static declarative mapping from application features to the roles allowed
//! to see and use them.

use serde::{Deserialize, Serialize};
use stockroom_core::Role;

/// Features whose visibility depends on the signed-in user's role
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Browse items and their locations
    ViewInventory,
    /// Look up items by scanning a barcode or QR code
    ScanBarcodes,
    /// Print barcode and QR labels
    PrintLabels,
    /// Create and edit items
    EditItems,
    /// Attach photos to items
    UploadImages,
    /// Remove items permanently
    DeleteItems,
    /// Create, rename and remove locations
    ManageLocations,
    /// Inventory reports
    ViewReports,
    /// Download reports as files
    ExportReports,
    /// Change other users' roles and profiles
    ManageUsers,
    /// Organization-wide settings
    ManageSettings,
}

/// One row of the feature table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRule {
    pub feature: Feature,
    /// Roles allowed to use the feature
    pub roles: &'static [Role],
    /// Still shown when only a degraded profile is available (read-only use)
    pub available_when_degraded: bool,
}

const EVERYONE: &[Role] = &[Role::Staff, Role::Manager, Role::Admin];
const MANAGERS: &[Role] = &[Role::Manager, Role::Admin];
const ADMINS: &[Role] = &[Role::Admin];

/// Feature visibility table
pub static FEATURE_TABLE: &[FeatureRule] = &[
    FeatureRule {
        feature: Feature::ViewInventory,
        roles: EVERYONE,
        available_when_degraded: true,
    },
    FeatureRule {
        feature: Feature::ScanBarcodes,
        roles: EVERYONE,
        available_when_degraded: true,
    },
    FeatureRule {
        feature: Feature::PrintLabels,
        roles: EVERYONE,
        available_when_degraded: true,
    },
    FeatureRule {
        feature: Feature::EditItems,
        roles: EVERYONE,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::UploadImages,
        roles: EVERYONE,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::DeleteItems,
        roles: MANAGERS,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::ManageLocations,
        roles: MANAGERS,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::ViewReports,
        roles: MANAGERS,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::ExportReports,
        roles: MANAGERS,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::ManageUsers,
        roles: ADMINS,
        available_when_degraded: false,
    },
    FeatureRule {
        feature: Feature::ManageSettings,
        roles: ADMINS,
        available_when_degraded: false,
    },
];

impl Feature {
    /// All features in table order
    pub fn all() -> impl Iterator<Item = Feature> {
        FEATURE_TABLE.iter().map(|rule| rule.feature)
    }

    /// Table row for this feature
    pub fn rule(&self) -> Option<&'static FeatureRule> {
        FEATURE_TABLE.iter().find(|rule| rule.feature == *self)
    }

    /// Roles allowed to use this feature; empty if the feature is not in the table
    pub fn allowed_roles(&self) -> &'static [Role] {
        self.rule().map(|rule| rule.roles).unwrap_or(&[])
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Feature::ViewInventory => "view_inventory",
            Feature::ScanBarcodes => "scan_barcodes",
            Feature::PrintLabels => "print_labels",
            Feature::EditItems => "edit_items",
            Feature::UploadImages => "upload_images",
            Feature::DeleteItems => "delete_items",
            Feature::ManageLocations => "manage_locations",
            Feature::ViewReports => "view_reports",
            Feature::ExportReports => "export_reports",
            Feature::ManageUsers => "manage_users",
            Feature::ManageSettings => "manage_settings",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Feature::all()
            .find(|feature| feature.to_string() == wanted)
            .ok_or_else(|| format!("Unknown feature: {}", s))
    }
}
