use tracing::info;
use uuid::Uuid;

use super::dto::UpdateUserRequest;
use crate::{
    auth::{
        password::{check_password_strength, hash_password, is_valid_email, normalize_email},
        repo::UserStore,
        repo_types::{Role, User, UserChanges},
    },
    error::AppError,
};

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub async fn get_user(users: &dyn UserStore, id: Uuid) -> Result<User, AppError> {
    users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))
}

/// Partial update. An administrator cannot drop their own admin role, so the
/// last administrator cannot lock everyone out.
pub async fn update_user(
    users: &dyn UserStore,
    caller: Uuid,
    id: Uuid,
    req: UpdateUserRequest,
) -> Result<User, AppError> {
    let mut changes = UserChanges {
        name: non_blank(req.name),
        ..Default::default()
    };

    if let Some(email) = non_blank(req.email) {
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(AppError::invalid_field("email", "invalid email"));
        }
        if let Some(other) = users.find_by_email(&email).await? {
            if other.id != id {
                return Err(AppError::Conflict("email already registered".into()));
            }
        }
        changes.email = Some(email);
    }

    if let Some(role) = non_blank(req.role) {
        let role: Role = role
            .parse()
            .map_err(|_| AppError::invalid_field("role", "invalid role"))?;
        if caller == id && role != Role::Admin {
            return Err(AppError::invalid_field(
                "role",
                "administrators cannot remove their own admin role",
            ));
        }
        changes.role = Some(role);
    }

    // Passwords are not trimmed.
    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        check_password_strength(&password).map_err(|m| AppError::invalid_field("password", m))?;
        changes.password_hash = Some(hash_password(&password)?);
    }

    let user = users
        .update(id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    info!(user_id = %user.id, updated_by = %caller, "user updated");
    Ok(user)
}

/// An administrator cannot delete their own account.
pub async fn delete_user(users: &dyn UserStore, caller: Uuid, id: Uuid) -> Result<(), AppError> {
    if caller == id {
        return Err(AppError::validation("administrators cannot delete their own account"));
    }
    if !users.delete(id).await? {
        return Err(AppError::NotFound("user not found".into()));
    }
    info!(user_id = %id, deleted_by = %caller, "user deleted");
    Ok(())
}
