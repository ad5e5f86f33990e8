// src/services/auth_service.rs
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{
    errors::{RiderError, RiderResult},
    models::user::{
        MessageResponse, ProfileUpdate, RegisterRequest, RegisterResponse, User, VerifyOtpResponse,
    },
    services::{api_client::ApiClient, token_store::TokenStore},
};

/// Phone + OTP login, registration and profile calls.
pub struct AuthService {
    api: Arc<ApiClient>,
    tokens: Arc<dyn TokenStore>,
}

impl AuthService {
    pub fn new(api: Arc<ApiClient>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { api, tokens }
    }

    /// Asks the backend to text an OTP to `phone_number`.
    pub async fn request_otp(&self, phone_number: &str) -> RiderResult<String> {
        let phone = validate_phone(phone_number)?;
        tracing::info!("Requesting OTP");
        let response: MessageResponse = self
            .api
            .post(&["auth", "login"], Some(&json!({ "phone_number": phone })))
            .await?;
        Ok(response.message)
    }

    pub async fn verify_otp(&self, phone_number: &str, otp: &str) -> RiderResult<User> {
        let phone = validate_phone(phone_number)?;
        let otp = validate_otp(otp)?;
        let response: VerifyOtpResponse = self
            .api
            .post(&["auth", "verify-otp"], Some(&json!({ "phone_number": phone, "otp": otp })))
            .await?;

        self.tokens.save_tokens(&response.tokens)?;
        self.tokens.save_user(&response.user)?;
        tracing::info!("Logged in as user {}", response.user.id);
        Ok(response.user)
    }

    pub async fn register(&self, request: &RegisterRequest) -> RiderResult<RegisterResponse> {
        validate_registration(request)?;
        self.api.post(&["auth", "register"], Some(request)).await
    }

    /// Fetches the profile and refreshes the cached copy. Fails locally,
    /// without a request, when there is no access token at all.
    pub async fn current_user(&self) -> RiderResult<User> {
        if self.tokens.access_token().is_none() {
            return Err(RiderError::NotAuthenticated);
        }
        let user: User = self.api.get(&["auth", "me"], &[]).await?;
        self.tokens.save_user(&user)?;
        Ok(user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> RiderResult<User> {
        if update.is_empty() {
            return Err(RiderError::validation_error("profile", "Nothing to update"));
        }
        let user: User = self.api.patch(&["auth", "me"], update).await?;
        self.tokens.save_user(&user)?;
        Ok(user)
    }

    /// Local state is cleared even when the server call fails.
    pub async fn logout(&self) -> RiderResult<()> {
        if let Some(refresh) = self.tokens.refresh_token() {
            let outcome: RiderResult<Value> = self
                .api
                .post(&["auth", "logout"], Some(&json!({ "refresh": refresh })))
                .await;
            if let Err(err) = outcome {
                tracing::warn!("Server logout failed: {}", err);
            }
        }
        self.tokens.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub fn cached_user(&self) -> Option<User> {
        self.tokens.stored_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }
}

fn validate_phone(phone_number: &str) -> RiderResult<&str> {
    let phone = phone_number.trim();
    if phone.is_empty() {
        return Err(RiderError::validation_error("phone_number", "Phone number is required"));
    }
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if !digits.chars().all(|c| c.is_ascii_digit() || c == ' ') {
        return Err(RiderError::validation_error(
            "phone_number",
            "Phone number may only contain digits",
        ));
    }
    Ok(phone)
}

fn validate_otp(otp: &str) -> RiderResult<&str> {
    let otp = otp.trim();
    if otp.is_empty() || !otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(RiderError::validation_error("otp", "Enter the code we sent you"));
    }
    Ok(otp)
}

fn validate_registration(request: &RegisterRequest) -> RiderResult<()> {
    let mut errors = Vec::new();
    if request.full_name.trim().is_empty() {
        errors.push(crate::ValidationError {
            field: "full_name".to_string(),
            message: "Full name is required".to_string(),
        });
    }
    if !request.email.contains('@') {
        errors.push(crate::ValidationError {
            field: "email".to_string(),
            message: "Enter a valid email address".to_string(),
        });
    }
    if let Err(RiderError::ValidationFailed(mut phone_errors)) = validate_phone(&request.phone_number) {
        errors.append(&mut phone_errors);
    }
    if errors.is_empty() { Ok(()) } else { Err(RiderError::ValidationFailed(errors)) }
}
