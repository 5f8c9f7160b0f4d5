use std::str::FromStr;

use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{AssessmentQuery, AssessmentRequest},
    repo::AssessmentStore,
    repo_types::{Assessment, AssessmentData, AssessmentFilter},
};
use crate::{
    auth::{repo_types::Role, services::AuthUser},
    error::AppError,
};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
pub const MAX_EVIDENCE_FILES: usize = 3;

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn parse_field<T: FromStr>(field: &str, value: Option<String>) -> Result<T, AppError> {
    value
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| AppError::invalid_field(field, format!("invalid {field}")))
}

/// Parses a list of wire strings, dropping repeats.
fn parse_list<T: FromStr + PartialEq>(field: &str, values: Vec<String>) -> Result<Vec<T>, AppError> {
    let mut out: Vec<T> = Vec::with_capacity(values.len());
    for v in values {
        let item = parse_field(field, Some(v))?;
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(out)
}

fn set_text(target: &mut String, field: &str, value: Option<String>) -> Result<(), AppError> {
    if let Some(v) = value {
        let v = v.trim();
        if v.is_empty() {
            return Err(AppError::invalid_field(field, format!("{field} must not be blank")));
        }
        *target = v.to_string();
    }
    Ok(())
}

/// Applies the fields present in `req` on top of `data`.
fn merge(mut data: AssessmentData, req: AssessmentRequest) -> Result<AssessmentData, AppError> {
    set_text(&mut data.responsible_name, "responsible_name", req.responsible_name)?;
    set_text(&mut data.document_number, "document_number", req.document_number)?;
    set_text(&mut data.phone_contact, "phone_contact", req.phone_contact)?;
    set_text(&mut data.full_address, "full_address", req.full_address)?;

    if let Some(n) = req.household_members {
        data.household_members = n;
    }
    if let Some(v) = req.vulnerable_groups {
        data.vulnerable_groups = parse_list("vulnerable_groups", v)?;
    }
    if req.reference_point.is_some() {
        data.reference_point = non_blank(req.reference_point);
    }
    if req.gps_latitude.is_some() {
        data.gps_latitude = req.gps_latitude;
    }
    if req.gps_longitude.is_some() {
        data.gps_longitude = req.gps_longitude;
    }
    if req.structure_type.is_some() {
        data.structure_type = parse_field("structure_type", req.structure_type)?;
    }
    if req.damage_level.is_some() {
        data.damage_level = parse_field("damage_level", req.damage_level)?;
    }
    if let Some(v) = req.losses {
        data.losses = parse_list("losses", v)?;
    }
    if req.losses_other.is_some() {
        data.losses_other = non_blank(req.losses_other);
    }
    if let Some(files) = req.evidence_files {
        data.evidence_files = files.into_iter().filter_map(|f| non_blank(Some(f))).collect();
    }
    if req.urgent_need.is_some() {
        data.urgent_need = parse_field("urgent_need", req.urgent_need)?;
    }
    if req.urgent_need_other.is_some() {
        data.urgent_need_other = non_blank(req.urgent_need_other);
    }
    Ok(data)
}

fn validate(data: &AssessmentData) -> Result<(), AppError> {
    if data.household_members < 1 {
        return Err(AppError::invalid_field(
            "household_members",
            "household_members must be at least 1",
        ));
    }
    if let Some(lat) = data.gps_latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::invalid_field("gps_latitude", "latitude must be within -90..90"));
        }
    }
    if let Some(lon) = data.gps_longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::invalid_field(
                "gps_longitude",
                "longitude must be within -180..180",
            ));
        }
    }
    if data.evidence_files.len() > MAX_EVIDENCE_FILES {
        return Err(AppError::invalid_field(
            "evidence_files",
            format!("at most {MAX_EVIDENCE_FILES} evidence files"),
        ));
    }
    Ok(())
}

/// Builds a complete record from a create request.
pub fn new_assessment(mut req: AssessmentRequest) -> Result<AssessmentData, AppError> {
    let missing: Vec<String> = [
        ("responsible_name", is_blank(&req.responsible_name)),
        ("document_number", is_blank(&req.document_number)),
        ("phone_contact", is_blank(&req.phone_contact)),
        ("household_members", req.household_members.is_none()),
        ("full_address", is_blank(&req.full_address)),
        ("structure_type", is_blank(&req.structure_type)),
        ("damage_level", is_blank(&req.damage_level)),
        ("urgent_need", is_blank(&req.urgent_need)),
    ]
    .into_iter()
    .filter(|(_, missing)| *missing)
    .map(|(field, _)| field.to_string())
    .collect();
    if !missing.is_empty() {
        return Err(AppError::missing_fields(missing));
    }

    let skeleton = AssessmentData {
        responsible_name: String::new(),
        document_number: String::new(),
        phone_contact: String::new(),
        household_members: 0,
        vulnerable_groups: Vec::new(),
        full_address: String::new(),
        reference_point: None,
        gps_latitude: None,
        gps_longitude: None,
        structure_type: parse_field("structure_type", req.structure_type.take())?,
        damage_level: parse_field("damage_level", req.damage_level.take())?,
        losses: Vec::new(),
        losses_other: None,
        evidence_files: Vec::new(),
        urgent_need: parse_field("urgent_need", req.urgent_need.take())?,
        urgent_need_other: None,
    };
    let data = merge(skeleton, req)?;
    validate(&data)?;
    Ok(data)
}

pub fn filter_from_query(q: AssessmentQuery) -> Result<AssessmentFilter, AppError> {
    let damage_level = non_blank(q.damage_level)
        .map(|v| parse_field("damage_level", Some(v)))
        .transpose()?;
    let structure_type = non_blank(q.structure_type)
        .map(|v| parse_field("structure_type", Some(v)))
        .transpose()?;
    let urgent_need = non_blank(q.urgent_need)
        .map(|v| parse_field("urgent_need", Some(v)))
        .transpose()?;

    Ok(AssessmentFilter {
        damage_level,
        structure_type,
        urgent_need,
        limit: q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: q.offset.unwrap_or(0).max(0),
    })
}

/// Admins and coordinators edit anything; field workers only their own.
pub fn can_edit(caller: &AuthUser, assessment: &Assessment) -> bool {
    match caller.role {
        Role::Admin | Role::Coordinator => true,
        Role::FieldWorker => assessment.created_by == Some(caller.id),
    }
}

pub async fn create_assessment(
    store: &dyn AssessmentStore,
    caller: &AuthUser,
    req: AssessmentRequest,
) -> Result<Assessment, AppError> {
    let data = new_assessment(req)?;
    let created = store.insert(data, caller.id).await?;
    info!(assessment_id = %created.id, created_by = %caller.id, "assessment created");
    Ok(created)
}

pub async fn get_assessment(store: &dyn AssessmentStore, id: Uuid) -> Result<Assessment, AppError> {
    store
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("assessment not found".into()))
}

pub async fn list_assessments(
    store: &dyn AssessmentStore,
    query: AssessmentQuery,
) -> Result<Vec<Assessment>, AppError> {
    let filter = filter_from_query(query)?;
    Ok(store.list(&filter).await?)
}

pub async fn update_assessment(
    store: &dyn AssessmentStore,
    caller: &AuthUser,
    id: Uuid,
    req: AssessmentRequest,
) -> Result<Assessment, AppError> {
    let existing = get_assessment(store, id).await?;
    if !can_edit(caller, &existing) {
        warn!(assessment_id = %id, user_id = %caller.id, "edit of foreign assessment refused");
        return Err(AppError::Forbidden);
    }

    let data = merge(existing.data, req)?;
    validate(&data)?;

    let updated = store
        .update(id, data)
        .await?
        .ok_or_else(|| AppError::NotFound("assessment not found".into()))?;
    info!(assessment_id = %id, updated_by = %caller.id, "assessment updated");
    Ok(updated)
}

pub async fn delete_assessment(
    store: &dyn AssessmentStore,
    caller: &AuthUser,
    id: Uuid,
) -> Result<(), AppError> {
    caller.require_role(&[Role::Admin, Role::Coordinator])?;
    if !store.delete(id).await? {
        return Err(AppError::NotFound("assessment not found".into()));
    }
    info!(assessment_id = %id, deleted_by = %caller.id, "assessment deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessments::{
        memory::MemoryAssessmentStore,
        repo_types::{DamageLevel, LossType, StructureType, UrgentNeed, VulnerableGroup},
    };

    fn caller(role: Role) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", role.as_str().to_lowercase()),
            role,
        }
    }

    fn request() -> AssessmentRequest {
        AssessmentRequest {
            responsible_name: Some("  Ana Silva ".into()),
            document_number: Some("004512LA042".into()),
            phone_contact: Some("+244923000111".into()),
            household_members: Some(5),
            vulnerable_groups: Some(vec!["idoso".into(), "bebe_crianca".into(), "idoso".into()]),
            full_address: Some("Bairro Azul, Rua 4, Luanda".into()),
            reference_point: Some("   ".into()),
            gps_latitude: Some(-8.8383),
            gps_longitude: Some(13.2344),
            structure_type: Some("habitacao".into()),
            damage_level: Some("grave".into()),
            losses: Some(vec!["moveis".into(), "documentos_pessoais".into()]),
            losses_other: None,
            evidence_files: Some(vec!["uploads/a.jpg".into()]),
            urgent_need: Some("abrigo_temporario".into()),
            urgent_need_other: None,
        }
    }

    #[test]
    fn create_request_is_normalized() {
        let data = new_assessment(request()).unwrap();
        assert_eq!(data.responsible_name, "Ana Silva");
        assert_eq!(
            data.vulnerable_groups,
            vec![VulnerableGroup::Elderly, VulnerableGroup::Child]
        );
        assert_eq!(data.reference_point, None);
        assert_eq!(data.structure_type, StructureType::Housing);
        assert_eq!(data.damage_level, DamageLevel::Severe);
        assert_eq!(data.losses, vec![LossType::Furniture, LossType::PersonalDocuments]);
        assert_eq!(data.urgent_need, UrgentNeed::TemporaryShelter);
    }

    #[test]
    fn create_reports_every_missing_field() {
        let err = new_assessment(AssessmentRequest {
            responsible_name: Some("Ana".into()),
            phone_contact: Some(" ".into()),
            ..Default::default()
        })
        .unwrap_err();
        let AppError::Validation { fields, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            fields,
            vec![
                "document_number",
                "phone_contact",
                "household_members",
                "full_address",
                "structure_type",
                "damage_level",
                "urgent_need"
            ]
        );
    }

    #[test]
    fn create_rejects_out_of_range_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut AssessmentRequest)>)> = vec![
            ("household_members", Box::new(|r: &mut AssessmentRequest| r.household_members = Some(0))),
            ("gps_latitude", Box::new(|r: &mut AssessmentRequest| r.gps_latitude = Some(90.5))),
            ("gps_longitude", Box::new(|r: &mut AssessmentRequest| r.gps_longitude = Some(-180.01))),
            ("damage_level", Box::new(|r: &mut AssessmentRequest| r.damage_level = Some("leve".into()))),
            ("losses", Box::new(|r: &mut AssessmentRequest| r.losses = Some(vec!["carro".into()]))),
            (
                "evidence_files",
                Box::new(|r: &mut AssessmentRequest| {
                    r.evidence_files = Some(vec!["a".into(), "b".into(), "c".into(), "d".into()])
                }),
            ),
        ];
        for (field, mutate) in cases {
            let mut req = request();
            mutate(&mut req);
            match new_assessment(req) {
                Err(AppError::Validation { fields, .. }) => assert_eq!(fields, vec![field]),
                other => panic!("{field}: expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        let mut req = request();
        req.gps_latitude = Some(-90.0);
        req.gps_longitude = Some(180.0);
        assert!(new_assessment(req).is_ok());
    }

    #[test]
    fn query_defaults_and_clamps() {
        let f = filter_from_query(AssessmentQuery::default()).unwrap();
        assert_eq!((f.limit, f.offset), (DEFAULT_LIMIT, 0));

        let f = filter_from_query(AssessmentQuery {
            limit: Some(1000),
            offset: Some(-3),
            damage_level: Some("total".into()),
            structure_type: Some("".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!((f.limit, f.offset), (MAX_LIMIT, 0));
        assert_eq!(f.damage_level, Some(DamageLevel::Total));
        assert_eq!(f.structure_type, None);

        let f = filter_from_query(AssessmentQuery {
            limit: Some(0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(f.limit, 1);

        assert!(filter_from_query(AssessmentQuery {
            urgent_need: Some("gasolina".into()),
            ..Default::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn field_worker_edits_only_own_assessments() {
        let store = MemoryAssessmentStore::default();
        let owner = caller(Role::FieldWorker);
        let other = caller(Role::FieldWorker);
        let coordinator = caller(Role::Coordinator);

        let created = create_assessment(&store, &owner, request()).await.unwrap();
        assert_eq!(created.created_by, Some(owner.id));

        let patch = || AssessmentRequest {
            damage_level: Some("total".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_assessment(&store, &other, created.id, patch()).await,
            Err(AppError::Forbidden)
        ));

        let updated = update_assessment(&store, &owner, created.id, patch()).await.unwrap();
        assert_eq!(updated.data.damage_level, DamageLevel::Total);
        assert_eq!(updated.data.responsible_name, "Ana Silva");
        assert_eq!(updated.created_by, Some(owner.id));

        let updated = update_assessment(
            &store,
            &coordinator,
            created.id,
            AssessmentRequest {
                household_members: Some(6),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.data.household_members, 6);
        assert_eq!(updated.data.damage_level, DamageLevel::Total);
    }

    #[tokio::test]
    async fn update_revalidates_and_reports_missing() {
        let store = MemoryAssessmentStore::default();
        let admin = caller(Role::Admin);
        let created = create_assessment(&store, &admin, request()).await.unwrap();

        let res = update_assessment(
            &store,
            &admin,
            created.id,
            AssessmentRequest {
                responsible_name: Some(" ".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(res, Err(AppError::Validation { .. })));

        let res = update_assessment(
            &store,
            &admin,
            created.id,
            AssessmentRequest {
                household_members: Some(-1),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(res, Err(AppError::Validation { .. })));

        let res =
            update_assessment(&store, &admin, Uuid::new_v4(), AssessmentRequest::default()).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));

        let unchanged = get_assessment(&store, created.id).await.unwrap();
        assert_eq!(unchanged.data, created.data);
    }

    #[tokio::test]
    async fn delete_requires_admin_or_coordinator() {
        let store = MemoryAssessmentStore::default();
        let worker = caller(Role::FieldWorker);
        let created = create_assessment(&store, &worker, request()).await.unwrap();

        assert!(matches!(
            delete_assessment(&store, &worker, created.id).await,
            Err(AppError::Forbidden)
        ));
        delete_assessment(&store, &caller(Role::Coordinator), created.id)
            .await
            .unwrap();
        assert!(matches!(
            delete_assessment(&store, &caller(Role::Admin), created.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_and_pages_newest_first() {
        let store = MemoryAssessmentStore::default();
        let worker = caller(Role::FieldWorker);
        let mut ids = Vec::new();
        for level in ["parcial", "grave", "total", "grave"] {
            let mut req = request();
            req.damage_level = Some(level.into());
            ids.push(create_assessment(&store, &worker, req).await.unwrap().id);
        }

        let severe = list_assessments(
            &store,
            AssessmentQuery {
                damage_level: Some("grave".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            severe.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![ids[3], ids[1]]
        );

        let page = list_assessments(
            &store,
            AssessmentQuery {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.iter().map(|a| a.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }
}
