use serde::{Deserialize, Serialize};

use super::repo_types::{DamageLevel, LossType, StructureType, UrgentNeed, VulnerableGroup};

/// Body of both create and update. On update, absent fields keep their
/// stored value; on create the required ones must be present.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssessmentRequest {
    pub responsible_name: Option<String>,
    pub document_number: Option<String>,
    pub phone_contact: Option<String>,
    pub household_members: Option<i32>,
    pub vulnerable_groups: Option<Vec<String>>,
    pub full_address: Option<String>,
    pub reference_point: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub structure_type: Option<String>,
    pub damage_level: Option<String>,
    pub losses: Option<Vec<String>>,
    pub losses_other: Option<String>,
    pub evidence_files: Option<Vec<String>>,
    pub urgent_need: Option<String>,
    pub urgent_need_other: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssessmentQuery {
    pub damage_level: Option<String>,
    pub structure_type: Option<String>,
    pub urgent_need: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AssessmentOptions {
    pub vulnerable_groups: &'static [VulnerableGroup],
    pub structure_types: &'static [StructureType],
    pub damage_levels: &'static [DamageLevel],
    pub losses: &'static [LossType],
    pub urgent_needs: &'static [UrgentNeed],
}

impl AssessmentOptions {
    pub fn all() -> Self {
        Self {
            vulnerable_groups: VulnerableGroup::ALL,
            structure_types: StructureType::ALL,
            damage_levels: DamageLevel::ALL,
            losses: LossType::ALL,
            urgent_needs: UrgentNeed::ALL,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub message: &'static str,
}
