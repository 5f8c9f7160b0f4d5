use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Closed set stored as TEXT and exchanged as its wire string.
macro_rules! wire_enum {
    ($name:ident, $kind:literal { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownValue { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

wire_enum!(VulnerableGroup, "vulnerable group" {
    Child => "bebe_crianca",
    Elderly => "idoso",
    Disabled => "pessoa_deficiencia",
    ChronicallyIll => "doente_cronico",
});

wire_enum!(StructureType, "structure type" {
    Housing => "habitacao",
    Commerce => "comercio",
    Agriculture => "agricultura",
    Other => "outro",
});

wire_enum!(DamageLevel, "damage level" {
    Partial => "parcial",
    Severe => "grave",
    Total => "total",
});

wire_enum!(LossType, "loss type" {
    Food => "alimentos",
    Clothing => "roupas_calcado",
    Furniture => "moveis",
    Appliances => "eletrodomesticos",
    PersonalDocuments => "documentos_pessoais",
    Pets => "animais_domesticos",
    Other => "outros",
});

wire_enum!(UrgentNeed, "urgent need" {
    DrinkingWater => "agua_potavel",
    Food => "alimentacao",
    TemporaryShelter => "abrigo_temporario",
    ClothesBlankets => "roupas_cobertores",
    Medicine => "medicamentos",
    Other => "outros",
});

/// Editable content of an assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentData {
    pub responsible_name: String,
    pub document_number: String,
    pub phone_contact: String,
    pub household_members: i32,
    pub vulnerable_groups: Vec<VulnerableGroup>,
    pub full_address: String,
    pub reference_point: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub structure_type: StructureType,
    pub damage_level: DamageLevel,
    pub losses: Vec<LossType>,
    pub losses_other: Option<String>,
    pub evidence_files: Vec<String>,
    pub urgent_need: UrgentNeed,
    pub urgent_need_other: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: AssessmentData,
    pub created_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct AssessmentRow {
    pub id: Uuid,
    pub responsible_name: String,
    pub document_number: String,
    pub phone_contact: String,
    pub household_members: i32,
    pub vulnerable_groups: Vec<String>,
    pub full_address: String,
    pub reference_point: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub structure_type: String,
    pub damage_level: String,
    pub losses: Vec<String>,
    pub losses_other: Option<String>,
    pub evidence_files: Vec<String>,
    pub urgent_need: String,
    pub urgent_need_other: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

fn parse_all<T: std::str::FromStr<Err = UnknownValue>>(
    values: Vec<String>,
) -> Result<Vec<T>, UnknownValue> {
    values.iter().map(|v| v.parse()).collect()
}

impl TryFrom<AssessmentRow> for Assessment {
    type Error = anyhow::Error;

    fn try_from(r: AssessmentRow) -> Result<Self, Self::Error> {
        let data = AssessmentData {
            responsible_name: r.responsible_name,
            document_number: r.document_number,
            phone_contact: r.phone_contact,
            household_members: r.household_members,
            vulnerable_groups: parse_all(r.vulnerable_groups)?,
            full_address: r.full_address,
            reference_point: r.reference_point,
            gps_latitude: r.gps_latitude,
            gps_longitude: r.gps_longitude,
            structure_type: r.structure_type.parse()?,
            damage_level: r.damage_level.parse()?,
            losses: parse_all(r.losses)?,
            losses_other: r.losses_other,
            evidence_files: r.evidence_files,
            urgent_need: r.urgent_need.parse()?,
            urgent_need_other: r.urgent_need_other,
        };
        Ok(Self {
            id: r.id,
            data,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Listing filter; `limit` and `offset` are already clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentFilter {
    pub damage_level: Option<DamageLevel>,
    pub structure_type: Option<StructureType>,
    pub urgent_need: Option<UrgentNeed>,
    pub limit: i64,
    pub offset: i64,
}

impl AssessmentFilter {
    pub fn matches(&self, a: &Assessment) -> bool {
        let d = &a.data;
        self.damage_level.map_or(true, |v| d.damage_level == v)
            && self.structure_type.map_or(true, |v| d.structure_type == v)
            && self.urgent_need.map_or(true, |v| d.urgent_need == v)
    }
}
