use std::sync::Arc;

use axum::extract::FromRef;
use time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::{Claims, IssuedToken, JwtKeys, TokenError},
        mailer::ResetCodeSender,
        password::{
            check_password_strength, hash_password, is_valid_email, normalize_email,
            verify_password,
        },
        repo::UserStore,
        repo_types::{NewUser, ResetRequest, Role, User, UserChanges},
        reset::generate_code,
    },
    clock::Clock,
    config::{BootstrapAdmin, ResetConfig},
    error::AppError,
    state::AppState,
};

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            warn!(user_id = %self.id, role = %self.role, "forbidden");
            Err(AppError::Forbidden)
        }
    }
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: IssuedToken,
    pub user: User,
}

/// Accepts `Bearer <token>` (any case for the scheme) or a bare token.
pub fn token_from_header(value: &str) -> Result<&str, AppError> {
    let value = value.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return Err(AppError::invalid_token()),
        None => value,
    };
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AppError::invalid_token());
    }
    Ok(token)
}

fn require_fields(fields: &[(&str, &str)]) -> Result<(), AppError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::missing_fields(missing))
    }
}

fn check_new_password(field: &str, password: &str) -> Result<(), AppError> {
    check_password_strength(password).map_err(|msg| AppError::invalid_field(field, msg))
}

/// Credential lifecycle: login, token checks, password change and reset,
/// registration.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn ResetCodeSender>,
    clock: Arc<dyn Clock>,
    keys: JwtKeys,
    reset: ResetConfig,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            users: state.users.clone(),
            mailer: state.mailer.clone(),
            clock: state.clock.clone(),
            keys: JwtKeys::from_ref(state),
            reset: state.config.reset.clone(),
        }
    }
}

impl AuthService {
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
        require_fields(&[("email", email), ("password", password)])?;
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::invalid_field("email", "invalid email"));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(%email, "login unknown email");
            return Err(AppError::invalid_credentials());
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AppError::invalid_credentials());
        }

        let token = self.keys.issue(&user, self.clock.now())?;
        info!(user_id = %user.id, role = %user.role, "user logged in");
        Ok(LoginOutcome { token, user })
    }

    /// Validates a header value (bare or `Bearer` token) and re-loads the
    /// account it names.
    pub async fn authenticate(&self, credential: &str) -> Result<AuthUser, AppError> {
        let (_, user) = self.resolve(credential).await?;
        Ok(AuthUser {
            id: user.id,
            email: user.email,
            role: user.role,
        })
    }

    /// Verified claims plus the account they belong to; a token for a
    /// deleted account is invalid.
    pub async fn resolve(&self, credential: &str) -> Result<(Claims, User), AppError> {
        let token = token_from_header(credential)?;
        let claims = self.verify_token(token)?;

        let Some(user) = self.users.find_by_id(claims.sub).await? else {
            warn!(user_id = %claims.sub, "token for deleted account");
            return Err(AppError::invalid_token());
        };
        Ok((claims, user))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AppError> {
        self.keys
            .verify(token, self.clock.now())
            .map_err(|e| match e {
                TokenError::Expired => {
                    warn!("expired token");
                    AppError::invalid_token()
                }
                TokenError::Invalid => {
                    warn!("invalid token");
                    AppError::invalid_token()
                }
            })
    }

    #[instrument(skip(self, current, new, confirm))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), AppError> {
        require_fields(&[
            ("current_password", current),
            ("new_password", new),
            ("confirm_password", confirm),
        ])?;

        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AppError::invalid_token());
        };
        if !verify_password(current, &user.password_hash)? {
            warn!(%user_id, "change password with wrong current password");
            return Err(AppError::invalid_credentials());
        }
        if new != confirm {
            return Err(AppError::invalid_field(
                "confirm_password",
                "new password and confirmation do not match",
            ));
        }
        check_new_password("new_password", new)?;
        if verify_password(new, &user.password_hash)? {
            return Err(AppError::invalid_field(
                "new_password",
                "new password must differ from the current one",
            ));
        }

        let changes = UserChanges {
            password_hash: Some(hash_password(new)?),
            ..Default::default()
        };
        self.users.update(user_id, changes).await?;
        info!(%user_id, "password changed");
        Ok(())
    }

    /// Always succeeds for a well-formed email, whether or not an account
    /// exists.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        require_fields(&[("email", email)])?;
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            info!(%email, "password reset for unknown email ignored");
            return Ok(());
        };

        let code = generate_code();
        let request = ResetRequest::new(
            &email,
            user.id,
            code.clone(),
            self.clock.now(),
            Duration::minutes(self.reset.code_ttl_minutes),
        );
        self.users.save_reset(&request).await?;

        if self.mailer.send_reset_code(&email, &code).await {
            info!(user_id = %user.id, "password reset requested");
        } else {
            warn!(user_id = %user.id, "reset code delivery failed; code kept");
        }
        Ok(())
    }

    #[instrument(skip(self, code, new, confirm))]
    pub async fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), AppError> {
        require_fields(&[
            ("email", email),
            ("code", code),
            ("new_password", new),
            ("confirm_password", confirm),
        ])?;
        if new != confirm {
            return Err(AppError::invalid_field(
                "confirm_password",
                "new password and confirmation do not match",
            ));
        }
        check_new_password("new_password", new)?;

        let email = normalize_email(email);
        let hash = hash_password(new)?;
        let user_id = self
            .users
            .consume_reset(
                &email,
                code.trim(),
                self.clock.now(),
                &hash,
                self.reset.max_attempts,
            )
            .await
            .map_err(|e| {
                warn!(%email, error = %e, "password reset rejected");
                AppError::from(e)
            })?;

        info!(%user_id, "password reset completed");
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<User, AppError> {
        require_fields(&[
            ("name", name),
            ("email", email),
            ("password", password),
            ("role", role),
        ])?;
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::invalid_field("email", "invalid email"));
        }
        let role: Role = role
            .parse()
            .map_err(|_| AppError::invalid_field("role", "invalid role"))?;
        check_new_password("password", password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AppError::Conflict("email already registered".into()));
        }

        let user = self
            .users
            .insert(NewUser {
                name: name.trim().to_string(),
                email,
                role,
                password_hash: hash_password(password)?,
            })
            .await?;
        info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Creates the configured administrator unless the email is already taken.
    pub async fn ensure_bootstrap_admin(&self, admin: &BootstrapAdmin) -> Result<(), AppError> {
        let email = normalize_email(&admin.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Ok(());
        }
        self.register_user(&admin.name, &email, &admin.password, Role::Admin.as_str())
            .await?;
        info!(%email, "bootstrap administrator created");
        Ok(())
    }
}
